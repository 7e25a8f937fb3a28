//! Explicit-namespace detection.
//!
//! When a directory and a source file both want the same symbol, the file
//! wins and the directory's children must be scanned the moment the file's
//! source concretely defines the namespace. This module keeps the wait
//! entries for those pending descents and notifies the owning loader when a
//! matching namespace is created.
//!
//! The detector stays dormant (a single atomic load) whenever no loader is
//! waiting. It plays no part in implicit autovivification, which the loader
//! completes synchronously.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::loader::Loader;
use crate::namespace::Namespace;
use crate::registry::LoaderId;

struct WaitEntry {
	/// Loader-relative symbol path, handed back on notification.
	cpath: String,
	loader: Weak<Loader>,
	loader_id: LoaderId,
}

/// Process-wide wait-entry table for explicit namespaces.
pub(crate) struct ExplicitNamespaces {
	enabled: AtomicBool,
	entries: Mutex<FxHashMap<String, WaitEntry>>,
}

impl ExplicitNamespaces {
	pub(crate) fn new() -> Self {
		ExplicitNamespaces {
			enabled: AtomicBool::new(false),
			entries: Mutex::new(FxHashMap::default()),
		}
	}

	/// Cheap dormancy check; callers skip key computation when disabled.
	pub(crate) fn enabled(&self) -> bool {
		self.enabled.load(Ordering::Acquire)
	}

	/// Wait for the namespace matching `key` to be concretely defined.
	pub(crate) fn register(&self, key: String, cpath: String, loader: Weak<Loader>, loader_id: LoaderId) {
		let mut entries = self.entries.lock();
		entries.insert(key, WaitEntry { cpath, loader, loader_id });
		self.enabled.store(true, Ordering::Release);
	}

	/// A namespace was concretely defined under `key`. If a loader is waiting
	/// on it, notify it so it descends into the queued subdirectories using
	/// the real namespace object.
	pub(crate) fn namespace_created(&self, key: &str, ns: &Arc<Namespace>) -> Result<()> {
		if !self.enabled() {
			return Ok(());
		}
		let hit = {
			let mut entries = self.entries.lock();
			let hit = entries.remove(key);
			if entries.is_empty() {
				self.enabled.store(false, Ordering::Release);
			}
			hit
		};
		let Some(entry) = hit else {
			return Ok(());
		};
		let Some(loader) = entry.loader.upgrade() else {
			return Ok(());
		};
		tracing::debug!(cpath = %entry.cpath, "explicit namespace defined, descending into pending directories");
		loader.on_namespace_loaded(&entry.cpath, ns)
	}

	pub(crate) fn unregister_loader(&self, id: LoaderId) {
		let mut entries = self.entries.lock();
		entries.retain(|_, entry| entry.loader_id != id);
		if entries.is_empty() {
			self.enabled.store(false, Ordering::Release);
		}
	}

	/// A loader-owned namespace acquired a permanent name: keys recorded
	/// under its old transient label must track the rename, transitively for
	/// the whole subtree.
	pub(crate) fn rewrite_prefix(&self, old: &str, new: &str) {
		let mut entries = self.entries.lock();
		if entries.is_empty() {
			return;
		}
		let rewritten = entries
			.drain()
			.map(|(key, entry)| {
				let key = if key == old {
					new.to_string()
				} else if key.starts_with(old) && key[old.len()..].starts_with("::") {
					format!("{new}{}", &key[old.len()..])
				} else {
					key
				};
				(key, entry)
			})
			.collect();
		*entries = rewritten;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn detector_with(keys: &[&str]) -> ExplicitNamespaces {
		let detector = ExplicitNamespaces::new();
		for key in keys {
			detector.register((*key).to_string(), (*key).to_string(), Weak::new(), LoaderId::next());
		}
		detector
	}

	#[test]
	fn dormant_until_registered() {
		let detector = ExplicitNamespaces::new();
		assert!(!detector.enabled());
		let detector = detector_with(&["Foo"]);
		assert!(detector.enabled());
	}

	#[test]
	fn disables_once_drained() {
		let detector = detector_with(&["Foo"]);
		let registry = crate::Registry::new();
		let ns = crate::Namespace::root(&registry, "Foo");
		detector.namespace_created("Foo", &ns).unwrap();
		assert!(!detector.enabled());
	}

	#[test]
	fn rewrites_prefixed_keys() {
		let detector = detector_with(&["#<loader:9>::Foo", "#<loader:9>::Foo::Bar", "#<loader:9>::Other"]);
		detector.rewrite_prefix("#<loader:9>::Foo", "Baz");
		let entries = detector.entries.lock();
		assert!(entries.contains_key("Baz"));
		assert!(entries.contains_key("Baz::Bar"));
		assert!(entries.contains_key("#<loader:9>::Other"));
	}
}
