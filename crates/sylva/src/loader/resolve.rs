//! Deferred-binding resolution.
//!
//! Entered from [`Namespace::get`] when a symbol with a pending binding is
//! first read. File bindings invoke the wrapped source loader and verify the
//! promised symbol was defined; directory bindings autovivify a namespace
//! under the vivification lock and descend into queued subdirectories before
//! publishing it; alias bindings re-resolve the loader-relative path and
//! re-bind the alias site.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::error::{Error, Result};
use crate::namespace::{Deferred, Namespace, Value};

use super::Loader;

impl Loader {
	pub(crate) fn resolve_file(&self, parent: &Arc<Namespace>, sym: &str, deferred: &Arc<Deferred>) -> Result<Option<Value>> {
		let source = self.source.read().clone();
		if !source.loaded(&deferred.abspath) {
			tracing::trace!(path = %deferred.abspath.display(), "loading source file");
			if let Err(error) = source.load(&deferred.abspath, parent) {
				parent.finish_failure(sym);
				self.state.lock().autoloads.shift_remove(&deferred.abspath);
				self.registry.unregister_inflight(&deferred.abspath);
				return Err(Error::Source {
					path: deferred.abspath.clone(),
					source: error,
				});
			}
		}
		self.on_file_loaded(parent, sym, deferred)
	}

	/// Bookkeeping after the source loader ran for a file binding.
	fn on_file_loaded(&self, parent: &Arc<Namespace>, sym: &str, deferred: &Arc<Deferred>) -> Result<Option<Value>> {
		let reloading = self.reloading.load(Ordering::Acquire);
		let cpath = {
			let mut state = self.state.lock();
			state.autoloads.shift_remove(&deferred.abspath);
			let cpath = self.rel_cpath(parent, sym);
			if reloading {
				state.to_unload.insert(
					cpath.clone(),
					(deferred.abspath.clone(), Arc::downgrade(parent), sym.to_string()),
				);
			}
			cpath
		};
		self.registry.unregister_inflight(&deferred.abspath);

		let Some(value) = parent.resolving_value(sym) else {
			// The source ran but did not define the symbol it promised. The
			// path stays marked loaded so this is not retried in a loop.
			parent.finish_failure(sym);
			return Err(Error::UnexpectedBindingResult {
				cpath: self.match_key(parent, sym),
				path: deferred.abspath.clone(),
			});
		};

		let mut descent = Ok(());
		if let Value::Namespace(ns) = &value {
			self.registry
				.register_namespace(ns.id(), Some(cpath.clone()), self.id, self.placeholder());
			// Descend into any subdirectories queued for this explicit
			// namespace before publishing it to racing readers.
			if self.registry.explicit.enabled() {
				descent = self.registry.explicit.namespace_created(&self.match_key(parent, sym), ns);
			}
		}

		// Publish before surfacing a descent error: the symbol was defined,
		// and waiting readers must be released either way.
		let value = parent.finish_bound(sym).unwrap_or(value);
		descent?;
		tracing::debug!(
			cpath = %cpath,
			path = %deferred.abspath.display(),
			"constant loaded from file"
		);
		self.run_on_load_callbacks(&cpath, &value, deferred, reloading);
		Ok(Some(value))
	}

	/// Autovivify the namespace for a directory binding. The vivification
	/// lock makes the check-create-descend sequence atomic across concurrent
	/// resolvers; racing readers wait on the slot gate and observe the
	/// fully-initialized namespace.
	pub(crate) fn resolve_dir(&self, parent: &Arc<Namespace>, sym: &str, deferred: &Arc<Deferred>) -> Result<Option<Value>> {
		let _vivify = self.vivify.lock();
		let ns = Namespace::transient(Arc::downgrade(&self.registry));
		parent.bind(sym.to_string(), Value::Namespace(ns.clone()));

		let reloading = self.reloading.load(Ordering::Acquire);
		let cpath = {
			let mut state = self.state.lock();
			state.autoloads.shift_remove(&deferred.abspath);
			let cpath = self.rel_cpath(parent, sym);
			if reloading {
				state.to_unload.insert(
					cpath.clone(),
					(deferred.abspath.clone(), Arc::downgrade(parent), sym.to_string()),
				);
			}
			// The in-flight registry entry is kept until eager load or
			// unload releases it; see ScanState::autoloaded_dirs.
			state.autoloaded_dirs.push(deferred.abspath.clone());
			cpath
		};
		self.registry
			.register_namespace(ns.id(), Some(cpath.clone()), self.id, self.placeholder());
		tracing::debug!(
			cpath = %cpath,
			dir = %deferred.abspath.display(),
			"namespace autovivified from directory"
		);

		let descent = self.on_namespace_loaded(&cpath, &ns);
		let value = parent.finish_bound(sym).unwrap_or(Value::Namespace(ns));
		descent?;
		self.run_on_load_callbacks(&cpath, &value, deferred, reloading);
		Ok(Some(value))
	}

	/// Re-resolve an alias reset by a previous unload: dereference the
	/// loader-relative path (re-triggering loading) and re-bind the alias
	/// site to the fresh value. A path that no longer resolves dissolves the
	/// alias.
	pub(crate) fn resolve_alias(&self, site: &Arc<Namespace>, sym: &str, cpath: &str) -> Result<Option<Value>> {
		match self.resolve_rel(cpath)? {
			Some(value) => {
				site.bind(sym.to_string(), value);
				Ok(site.finish_bound(sym))
			}
			None => {
				tracing::debug!(cpath, "aliased symbol no longer resolves, alias dissolved");
				site.finish_failure(sym);
				Ok(None)
			}
		}
	}

	/// Resolve a loader-relative symbol path against the loader's root, or
	/// against a custom root namespace whose permanent name prefixes it.
	fn resolve_rel(&self, cpath: &str) -> Result<Option<Value>> {
		if let Some(value) = self.root.at(cpath)? {
			return Ok(Some(value));
		}
		let roots: Vec<Arc<Namespace>> = { self.config.read().roots.values().cloned().collect() };
		for ns in roots {
			if Arc::ptr_eq(&ns, &self.root) {
				continue;
			}
			let Some(name) = ns.permanent_name() else {
				continue;
			};
			if cpath == name {
				return Ok(Some(Value::Namespace(ns)));
			}
			if let Some(rest) = cpath.strip_prefix(&format!("{name}::")) {
				if let Some(value) = ns.at(rest)? {
					return Ok(Some(value));
				}
			}
		}
		Ok(None)
	}

	fn run_on_load_callbacks(&self, cpath: &str, value: &Value, deferred: &Deferred, reloading: bool) {
		let (specific, any) = {
			let mut callbacks = self.callbacks.lock();
			if callbacks.on_load.is_empty() && callbacks.on_load_any.is_empty() {
				return;
			}
			let specific = if reloading {
				callbacks.on_load.get(cpath).cloned().unwrap_or_default()
			} else {
				callbacks.on_load.remove(cpath).unwrap_or_default()
			};
			(specific, callbacks.on_load_any.clone())
		};
		for callback in specific {
			callback(value, &deferred.abspath);
		}
		for callback in any {
			callback(cpath, value, &deferred.abspath);
		}
	}

	pub(crate) fn run_on_unload_callbacks(&self, cpath: &str, value: &Value, abspath: &std::path::Path) {
		let (specific, any) = {
			let callbacks = self.callbacks.lock();
			(
				callbacks.on_unload.get(cpath).cloned().unwrap_or_default(),
				callbacks.on_unload_any.clone(),
			)
		};
		for callback in specific {
			callback(value, abspath);
		}
		for callback in any {
			callback(cpath, value, abspath);
		}
	}
}
