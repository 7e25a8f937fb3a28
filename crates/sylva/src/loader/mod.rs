//! The loader: owns root directories, compiles them into deferred bindings,
//! and drives the setup / unload / reload and eager-load lifecycles.

mod config;
mod eager;
mod lifecycle;
mod resolve;
mod scan;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::Result;
use crate::inflect::DefaultInflector;
use crate::namespace::{Deferred, DeferredKind, Namespace, name_join};
use crate::registry::{LoaderId, Registry};
use crate::source::SourceLoader;

use config::{Callbacks, Config};

/// Loader-side index entry for a pending deferred binding, keyed by absolute
/// path. Holds everything unload needs to discard the binding without side
/// effects.
pub(crate) struct PendingBinding {
	pub ns: Weak<Namespace>,
	pub sym: String,
	pub deferred: Arc<Deferred>,
}

/// Mutable scan-time and load-time bookkeeping, all behind one lock.
#[derive(Default)]
pub(crate) struct ScanState {
	pub setup: bool,
	pub eager_loaded: bool,
	/// Deferred bindings not yet resolved, in scan order.
	pub autoloads: IndexMap<PathBuf, PendingBinding>,
	/// Directories whose namespaces were autovivified; their in-flight
	/// registry entries are released at the end of eager loading.
	pub autoloaded_dirs: Vec<PathBuf>,
	/// Resolved bindings, in resolution order. Only filled while reloading
	/// is enabled.
	pub to_unload: IndexMap<String, (PathBuf, Weak<Namespace>, String)>,
	/// Subdirectories queued per namespace until its object exists.
	pub namespace_dirs: FxHashMap<String, Vec<PathBuf>>,
	/// Files whose symbol was already taken when scanned.
	pub shadowed: FxHashSet<PathBuf>,
}

/// Compiles root directories into a namespace tree with deferred bindings.
///
/// A loader owns a transiently named root namespace; symbols load under it
/// and can be aliased into permanently named namespaces with
/// [`Namespace::bind`]. Loaders sharing a [`Registry`] coexist without
/// claiming overlapping directories.
pub struct Loader {
	id: LoaderId,
	registry: Arc<Registry>,
	root: Arc<Namespace>,
	/// Coarse lock serializing setup, unload, reload, and eager load.
	lifecycle: Mutex<()>,
	/// Fine-grained lock making directory autovivification atomic across
	/// concurrent resolvers.
	vivify: Mutex<()>,
	config: RwLock<Config>,
	state: Mutex<ScanState>,
	source: RwLock<Arc<dyn SourceLoader>>,
	reloading: AtomicBool,
	callbacks: Mutex<Callbacks>,
	weak_self: Weak<Loader>,
}

impl Loader {
	/// Create a loader backed by `source`, coordinated through `registry`.
	pub fn new(registry: Arc<Registry>, source: Arc<dyn SourceLoader>) -> Arc<Loader> {
		let id = LoaderId::next();
		let root = Namespace::transient(Arc::downgrade(&registry));
		let loader = Arc::new_cyclic(|weak_self| Loader {
			id,
			registry: registry.clone(),
			root: root.clone(),
			lifecycle: Mutex::new(()),
			vivify: Mutex::new(()),
			config: RwLock::new(Config::new(Arc::new(DefaultInflector::new()))),
			state: Mutex::new(ScanState::default()),
			source: RwLock::new(source),
			reloading: AtomicBool::new(false),
			callbacks: Mutex::new(Callbacks::default()),
			weak_self: weak_self.clone(),
		});
		registry.register_loader(&loader);
		registry.register_namespace(root.id(), None, id, loader.placeholder());
		loader
	}

	/// The loader's root namespace. Symbols from root directories pushed
	/// with [`Loader::push_root_dir`] resolve under it.
	pub fn root(&self) -> &Arc<Namespace> {
		&self.root
	}

	pub fn registry(&self) -> &Arc<Registry> {
		&self.registry
	}

	pub(crate) fn loader_id(&self) -> LoaderId {
		self.id
	}

	/// Detach this loader from the registry and the explicit-namespace
	/// detector without unloading anything.
	pub fn unregister(&self) {
		self.registry.unregister_loader(self.id);
		self.registry.explicit.unregister_loader(self.id);
	}

	/// Transient label namespaces under this loader are known by until they
	/// acquire a permanent name.
	pub(crate) fn placeholder(&self) -> String {
		format!("#<{}>", self.tag())
	}

	/// Loader-relative symbol path of `sym` under `parent`. Stable across
	/// renames; keys unload records, pending-subdirectory queues, and alias
	/// records.
	pub(crate) fn rel_cpath(&self, parent: &Arc<Namespace>, sym: &str) -> String {
		if Arc::ptr_eq(parent, &self.root) {
			return sym.to_string();
		}
		if let Some((Some(rel), owner)) = self.registry.namespace_cpath(parent.id()) {
			if owner == self.id {
				return name_join(&rel, sym);
			}
		}
		if let Some(name) = parent.permanent_name() {
			return name_join(&name, sym);
		}
		tracing::warn!(sym, "binding under an unnamed, unmanaged namespace");
		sym.to_string()
	}

	/// Name-sensitive key for explicit-namespace matching: the permanent
	/// symbol path when the parent has one, otherwise a placeholder-prefixed
	/// path that wait-entry rewrites keep in sync.
	pub(crate) fn match_key(&self, parent: &Arc<Namespace>, sym: &str) -> String {
		match parent.permanent_name() {
			Some(name) => name_join(&name, sym),
			None => format!("{}::{}", self.placeholder(), self.rel_cpath(parent, sym)),
		}
	}

	pub(crate) fn resolve_deferred(
		&self,
		parent: &Arc<Namespace>,
		sym: &str,
		deferred: &Arc<Deferred>,
	) -> Result<Option<crate::Value>> {
		match &deferred.kind {
			DeferredKind::File => self.resolve_file(parent, sym, deferred),
			DeferredKind::Dir => self.resolve_dir(parent, sym, deferred),
			DeferredKind::Alias { cpath } => self.resolve_alias(parent, sym, cpath),
		}
	}

	/// The namespace at `cpath` concretely exists now; descend into every
	/// subdirectory queued for it.
	pub(crate) fn on_namespace_loaded(&self, cpath: &str, ns: &Arc<Namespace>) -> Result<()> {
		let dirs = { self.state.lock().namespace_dirs.remove(cpath) };
		let Some(dirs) = dirs else {
			return Ok(());
		};
		let ctx = self.scan_ctx();
		let mut state = self.state.lock();
		for dir in dirs {
			self.scan_dir(&ctx, &mut state, &dir, Some(ns))?;
		}
		Ok(())
	}
}

impl Drop for Loader {
	fn drop(&mut self) {
		self.registry.unregister_loader(self.id);
		self.registry.explicit.unregister_loader(self.id);
	}
}

impl fmt::Debug for Loader {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Loader").field("tag", &self.tag()).finish_non_exhaustive()
	}
}

impl fmt::Display for Loader {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.tag())
	}
}
