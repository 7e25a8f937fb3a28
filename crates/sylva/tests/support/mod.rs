//! Shared fixtures: on-disk source trees and a recording fake source loader.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use sylva::{Namespace, SourceError, SourceLoader};

pub const EXT: &str = "def";

pub fn init_tracing() {
	static ONCE: Once = Once::new();
	ONCE.call_once(|| {
		let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	});
}

/// Create a temporary tree. Entries ending in `/` become directories, the
/// rest become empty files (their content is never read; definitions live in
/// the [`TestSource`]).
pub fn tree(entries: &[&str]) -> tempfile::TempDir {
	init_tracing();
	let dir = tempfile::tempdir().unwrap();
	for entry in entries {
		let path = dir.path().join(entry.trim_end_matches('/'));
		if entry.ends_with('/') {
			std::fs::create_dir_all(&path).unwrap();
		} else {
			std::fs::create_dir_all(path.parent().unwrap()).unwrap();
			std::fs::File::create(&path).unwrap();
		}
	}
	dir
}

type Def = Arc<dyn Fn(&Arc<Namespace>) + Send + Sync>;

/// Fake resource-loading primitive: runs registered definitions against the
/// target namespace and keeps a loaded cache plus per-path load counts.
///
/// Files without a registered definition define a namespace named after
/// their camelized stem, the way an explicit-namespace source would.
#[derive(Default)]
pub struct TestSource {
	defs: Mutex<HashMap<PathBuf, Def>>,
	loaded: Mutex<HashSet<PathBuf>>,
	counts: Mutex<HashMap<PathBuf, usize>>,
	failing: Mutex<HashSet<PathBuf>>,
}

impl TestSource {
	pub fn new() -> Arc<TestSource> {
		Arc::new(TestSource::default())
	}

	/// Register what loading `path` defines.
	pub fn define(&self, path: impl Into<PathBuf>, def: impl Fn(&Arc<Namespace>) + Send + Sync + 'static) {
		self.defs.lock().unwrap().insert(path.into(), Arc::new(def));
	}

	/// Loading `path` binds the leaf string `value` under `sym`.
	pub fn define_value(&self, path: impl Into<PathBuf>, sym: &str, value: &'static str) {
		let sym = sym.to_string();
		self.define(path, move |ns| ns.define(&sym, value));
	}

	/// Loading `path` defines nothing, breaking its binding's promise.
	pub fn define_nothing(&self, path: impl Into<PathBuf>) {
		self.define(path, |_| {});
	}

	/// Loading `path` fails without marking it loaded.
	pub fn fail(&self, path: impl Into<PathBuf>) {
		self.failing.lock().unwrap().insert(path.into());
	}

	pub fn load_count(&self, path: impl AsRef<Path>) -> usize {
		self.counts.lock().unwrap().get(path.as_ref()).copied().unwrap_or(0)
	}
}

fn camelize(stem: &str) -> String {
	stem.split('_')
		.map(|part| {
			let mut chars = part.chars();
			match chars.next() {
				Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
				None => String::new(),
			}
		})
		.collect()
}

impl SourceLoader for TestSource {
	fn extension(&self) -> &str {
		EXT
	}

	fn load(&self, path: &Path, ns: &Arc<Namespace>) -> Result<(), SourceError> {
		if self.failing.lock().unwrap().contains(path) {
			return Err(format!("simulated load failure for {}", path.display()).into());
		}
		*self.counts.lock().unwrap().entry(path.to_path_buf()).or_insert(0) += 1;
		let def = self.defs.lock().unwrap().get(path).cloned();
		match def {
			Some(def) => def(ns),
			None => {
				let stem = path
					.file_stem()
					.and_then(|s| s.to_str())
					.expect("fixture paths are UTF-8");
				ns.define_namespace(&camelize(stem));
			}
		}
		self.loaded.lock().unwrap().insert(path.to_path_buf());
		Ok(())
	}

	fn loaded(&self, path: &Path) -> bool {
		self.loaded.lock().unwrap().contains(path)
	}

	fn forget(&self, path: &Path) {
		self.loaded.lock().unwrap().remove(path);
	}
}
