//! Setup, unload, and reload.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::error::{Error, Result};
use crate::namespace::{Deferred, DeferredKind, Value};

use super::{Loader, ScanState};

impl Loader {
	/// Scan every root directory and set deferred bindings for its entries.
	///
	/// Idempotent: a second call without an intervening `unload` does no
	/// additional scanning. A scan failure (bad symbol name, filesystem
	/// error) aborts the whole call and leaves no deferred bindings
	/// registered by it.
	pub fn setup(&self) -> Result<()> {
		let _lifecycle = self.lifecycle.lock();
		if self.state.lock().setup {
			return Ok(());
		}

		let roots: Vec<std::path::PathBuf> = { self.config.read().roots.keys().cloned().collect() };
		for dir in &roots {
			self.registry.register_root_dir(self.id, dir)?;
		}
		// The root's alias record may have been dropped by a previous unload.
		self.registry
			.register_namespace(self.root.id(), None, self.id, self.placeholder());

		let ctx = self.scan_ctx();
		let actual_roots = self.actual_roots();
		{
			let mut state = self.state.lock();
			for (dir, ns) in actual_roots {
				if let Err(error) = self.scan_dir(&ctx, &mut state, &dir, Some(&ns)) {
					self.rollback_scan(&mut state);
					return Err(error);
				}
			}
			state.setup = true;
		}

		let callbacks = { self.callbacks.lock().on_setup.clone() };
		for callback in callbacks {
			callback();
		}
		tracing::debug!(loader = %self.tag(), "setup done");
		Ok(())
	}

	/// Undo a partially completed scan so a failed `setup` leaves nothing
	/// behind.
	fn rollback_scan(&self, state: &mut ScanState) {
		let pending: Vec<_> = state.autoloads.drain(..).collect();
		for (path, binding) in pending {
			if let Some(ns) = binding.ns.upgrade() {
				ns.remove_if_deferred(&binding.sym, &binding.deferred);
			}
			self.registry.unregister_inflight(&path);
		}
		state.namespace_dirs.clear();
		state.shadowed.clear();
		self.registry.explicit.unregister_loader(self.id);
	}

	/// Remove every symbol this loader bound and every deferred binding it
	/// set, making all touched source files loadable again.
	///
	/// Inbound aliases recorded for loader-owned namespaces are reset to
	/// fresh deferred bindings so that dereferencing them after the next
	/// `setup` transparently re-triggers loading.
	pub fn unload(&self) -> Result<()> {
		let _lifecycle = self.lifecycle.lock();
		let (autoloads, to_unload) = {
			let mut state = self.state.lock();
			if !state.setup {
				return Err(Error::SetupRequired);
			}
			state.setup = false;
			state.eager_loaded = false;
			state.autoloaded_dirs.clear();
			state.namespace_dirs.clear();
			state.shadowed.clear();
			(mem::take(&mut state.autoloads), mem::take(&mut state.to_unload))
		};

		for (_, binding) in autoloads {
			if let Some(ns) = binding.ns.upgrade() {
				ns.remove_if_deferred(&binding.sym, &binding.deferred);
			}
		}

		let source = self.source.read().clone();
		let ext = source.extension().to_string();
		let mut unloaded_files = Vec::new();

		for (cpath, (abspath, ns_weak, sym)) in to_unload {
			let Some(ns) = ns_weak.upgrade() else {
				continue;
			};
			if let Some(value) = ns.peek(&sym) {
				self.run_on_unload_callbacks(&cpath, &value, &abspath);
				if let Value::Namespace(module) = &value {
					for (site_weak, site_sym) in self.registry.take_record_refs(module.id()) {
						let Some(site) = site_weak.upgrade() else {
							continue;
						};
						site.reset_to_alias(
							&site_sym,
							Arc::new(Deferred {
								abspath: abspath.clone(),
								kind: DeferredKind::Alias { cpath: cpath.clone() },
								loader: self.weak_self.clone(),
								loader_id: self.id,
							}),
						);
						tracing::debug!(
							cpath = %cpath,
							site = %site_sym,
							"inbound reference replaced by a deferred binding"
						);
					}
				}
			}
			// Tolerates the user having removed the symbol by hand.
			ns.remove_bound(&sym);
			tracing::debug!(cpath = %cpath, "unloaded");
			if abspath.extension().and_then(|e| e.to_str()) == Some(ext.as_str()) {
				unloaded_files.push(abspath);
			}
		}

		for path in &unloaded_files {
			source.forget(path);
		}

		self.registry.on_unload(self.id);
		self.registry.explicit.unregister_loader(self.id);
		Ok(())
	}

	/// `unload` followed by a fresh scan, picking up filesystem changes.
	pub fn reload(&self) -> Result<()> {
		if !self.reloading.load(Ordering::Acquire) {
			return Err(Error::ReloadingDisabled);
		}
		self.unload()?;
		self.recompute_matchers()?;
		self.setup()
	}

	/// Would the symbol at `cpath` (loader-relative) be removed on reload?
	/// Always false while reloading is disabled.
	pub fn unloadable(&self, cpath: &str) -> bool {
		self.state.lock().to_unload.contains_key(cpath)
	}

	/// Loader-relative symbol paths that would be removed on reload, in
	/// resolution order.
	pub fn unloadable_paths(&self) -> Vec<String> {
		self.state.lock().to_unload.keys().cloned().collect()
	}
}
