//! Cross-loader coordination.
//!
//! A [`Registry`] lets independent loaders coexist without directory or
//! symbol collisions. It owns only weak, lookup-only associations; dropping
//! or unregistering a loader is enough to release everything it contributed.
//!
//! Registries are injectable: construct one at process start and pass it by
//! reference to every loader. Tests create fresh registries at will.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::detect::ExplicitNamespaces;
use crate::error::{Error, Result};
use crate::loader::Loader;
use crate::namespace::{Namespace, NsId};

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a loader, unique within the process.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct LoaderId(u64);

impl LoaderId {
	pub(crate) fn next() -> Self {
		LoaderId(NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed))
	}
}

impl fmt::Display for LoaderId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "loader:{}", self.0)
	}
}

/// Bookkeeping for a loader-owned namespace object: its loader-relative
/// symbol path and every inbound reference bound under a permanent name,
/// consumed at unload time to reset those aliases to deferred bindings.
struct AliasRecord {
	cpath: Option<String>,
	placeholder: String,
	loader: LoaderId,
	refs: Vec<(Weak<Namespace>, String)>,
}

#[derive(Default)]
struct RegistryInner {
	loaders: Vec<(LoaderId, Weak<Loader>)>,
	root_dirs: Vec<(LoaderId, PathBuf)>,
	/// Managed source files, registered during scan.
	paths: FxHashMap<PathBuf, LoaderId>,
	/// Paths with a pending or resolving deferred binding.
	inflight: FxHashMap<PathBuf, LoaderId>,
	namespaces: FxHashMap<NsId, AliasRecord>,
}

/// Process-wide coordination shared by all loaders constructed with it.
pub struct Registry {
	inner: Mutex<RegistryInner>,
	pub(crate) explicit: ExplicitNamespaces,
}

impl Registry {
	pub fn new() -> Arc<Registry> {
		Arc::new(Registry {
			inner: Mutex::new(RegistryInner::default()),
			explicit: ExplicitNamespaces::new(),
		})
	}

	pub(crate) fn register_loader(&self, loader: &Arc<Loader>) {
		let mut inner = self.inner.lock();
		inner.loaders.push((loader.loader_id(), Arc::downgrade(loader)));
	}

	/// Claim `dir` for `loader_id`, failing when another active loader's root
	/// directory is an ancestor or descendant of it. Roots the same loader
	/// already claimed are exempt, as are roots either loader ignores.
	pub(crate) fn register_root_dir(&self, loader_id: LoaderId, dir: &Path) -> Result<()> {
		let mut inner = self.inner.lock();
		let claimant = inner
			.loaders
			.iter()
			.find(|(id, _)| *id == loader_id)
			.and_then(|(_, weak)| weak.upgrade());
		for (other_id, other_dir) in &inner.root_dirs {
			if *other_id == loader_id {
				continue;
			}
			if !dir.starts_with(other_dir) && !other_dir.starts_with(dir) {
				continue;
			}
			let other = inner
				.loaders
				.iter()
				.find(|(id, _)| id == other_id)
				.and_then(|(_, weak)| weak.upgrade());
			let Some(other) = other else {
				// Stale claim from a dropped loader.
				continue;
			};
			if other.ignores(dir) {
				continue;
			}
			if let Some(claimant) = &claimant {
				if claimant.ignores(other_dir) {
					continue;
				}
			}
			return Err(Error::ConfigurationConflict {
				loader: claimant.as_ref().map_or_else(|| loader_id.to_string(), |l| l.tag()),
				other: other.tag(),
				dir: dir.to_path_buf(),
				other_dir: other_dir.clone(),
			});
		}
		if !inner.root_dirs.iter().any(|(id, d)| *id == loader_id && d == dir) {
			inner.root_dirs.push((loader_id, dir.to_path_buf()));
		}
		Ok(())
	}

	/// The loader that currently has a pending or resolving deferred binding
	/// for `path`, if any.
	pub fn loader_for(&self, path: &Path) -> Option<Arc<Loader>> {
		let inner = self.inner.lock();
		let id = inner.inflight.get(path)?;
		inner
			.loaders
			.iter()
			.find(|(lid, _)| lid == id)
			.and_then(|(_, weak)| weak.upgrade())
	}

	/// The loader managing `path`, regardless of whether its binding is
	/// still pending. Useful to route completion notifications for sources
	/// loaded out of band.
	pub fn managing_loader(&self, path: &Path) -> Option<Arc<Loader>> {
		let inner = self.inner.lock();
		let id = inner.paths.get(path)?;
		inner
			.loaders
			.iter()
			.find(|(lid, _)| lid == id)
			.and_then(|(_, weak)| weak.upgrade())
	}

	/// Broadcast eager loading to every live loader. Loaders that have not
	/// been set up are skipped.
	pub fn eager_load_all(&self) -> Result<()> {
		let loaders: Vec<Arc<Loader>> = {
			let inner = self.inner.lock();
			inner.loaders.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
		};
		for loader in loaders {
			match loader.eager_load(false) {
				Err(Error::SetupRequired) => {}
				other => other?,
			}
		}
		Ok(())
	}

	pub(crate) fn register_path(&self, loader_id: LoaderId, path: &Path) {
		self.inner.lock().paths.insert(path.to_path_buf(), loader_id);
	}

	pub(crate) fn register_inflight(&self, loader_id: LoaderId, path: &Path) {
		self.inner.lock().inflight.insert(path.to_path_buf(), loader_id);
	}

	pub(crate) fn unregister_inflight(&self, path: &Path) {
		self.inner.lock().inflight.remove(path);
	}

	/// Record a loader-owned namespace. Idempotent: an existing record (and
	/// its accumulated inbound references) is left untouched.
	pub(crate) fn register_namespace(
		&self,
		ns: NsId,
		cpath: Option<String>,
		loader_id: LoaderId,
		placeholder: String,
	) {
		let mut inner = self.inner.lock();
		inner.namespaces.entry(ns).or_insert(AliasRecord {
			cpath,
			placeholder,
			loader: loader_id,
			refs: Vec::new(),
		});
	}

	/// Loader-relative symbol path of a loader-owned namespace.
	pub(crate) fn namespace_cpath(&self, ns: NsId) -> Option<(Option<String>, LoaderId)> {
		let inner = self.inner.lock();
		inner.namespaces.get(&ns).map(|rec| (rec.cpath.clone(), rec.loader))
	}

	/// Consume a namespace's alias record, returning its inbound references.
	pub(crate) fn take_record_refs(&self, ns: NsId) -> Vec<(Weak<Namespace>, String)> {
		let mut inner = self.inner.lock();
		inner.namespaces.remove(&ns).map(|rec| rec.refs).unwrap_or_default()
	}

	/// Symbol-rebind hook: `value` was just bound to `sym` in the permanently
	/// named namespace `parent` under permanent path `cpath`. Records the
	/// inbound reference when the value is a loader-owned namespace, rewrites
	/// wait-entry keys when the namespace acquired its first permanent name,
	/// and feeds the namespace-created event. Lookup misses fall through to
	/// plain binding behavior.
	pub(crate) fn on_permanent_bind(
		&self,
		parent: &Arc<Namespace>,
		sym: &str,
		ns: &Arc<Namespace>,
		had_name: bool,
		cpath: &str,
	) {
		let rewrite = {
			let mut inner = self.inner.lock();
			match inner.namespaces.get_mut(&ns.id()) {
				Some(rec) => {
					rec.refs.push((Arc::downgrade(parent), sym.to_string()));
					if had_name {
						None
					} else {
						let old = match &rec.cpath {
							Some(rel) => format!("{}::{rel}", rec.placeholder),
							None => rec.placeholder.clone(),
						};
						Some((old, cpath.to_string()))
					}
				}
				None => None,
			}
		};
		if let Some((old, new)) = rewrite {
			self.explicit.rewrite_prefix(&old, &new);
		}
		if self.explicit.enabled() {
			if let Err(error) = self.explicit.namespace_created(cpath, ns) {
				tracing::error!(%error, cpath, "descent into pending namespace directories failed");
			}
		}
	}

	/// Drop the entries a loader contributed during its setup/load cycle,
	/// keeping the loader itself (and its root-directory claims) registered.
	pub(crate) fn on_unload(&self, loader_id: LoaderId) {
		let mut inner = self.inner.lock();
		inner.paths.retain(|_, id| *id != loader_id);
		inner.inflight.retain(|_, id| *id != loader_id);
		inner.namespaces.retain(|_, rec| rec.loader != loader_id);
	}

	/// Remove every entry keyed to a loader across all maps.
	pub(crate) fn unregister_loader(&self, loader_id: LoaderId) {
		let mut inner = self.inner.lock();
		inner.loaders.retain(|(id, _)| *id != loader_id);
		inner.root_dirs.retain(|(id, _)| *id != loader_id);
		inner.paths.retain(|_, id| *id != loader_id);
		inner.inflight.retain(|_, id| *id != loader_id);
		inner.namespaces.retain(|_, rec| rec.loader != loader_id);
	}
}
