//! Loader configuration: root directories, ignore/collapse rules, eager-load
//! exclusions, inflection, tagging, and lifecycle callbacks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, Result};
use crate::inflect::Inflector;
use crate::namespace::{Namespace, Value};

use super::Loader;

pub(crate) type SetupCallback = Arc<dyn Fn() + Send + Sync>;
pub(crate) type LoadCallback = Arc<dyn Fn(&Value, &Path) + Send + Sync>;
pub(crate) type LoadAnyCallback = Arc<dyn Fn(&str, &Value, &Path) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Callbacks {
	pub on_setup: Vec<SetupCallback>,
	pub on_load: FxHashMap<String, Vec<LoadCallback>>,
	pub on_load_any: Vec<LoadAnyCallback>,
	pub on_unload: FxHashMap<String, Vec<LoadCallback>>,
	pub on_unload_any: Vec<LoadAnyCallback>,
}

pub(crate) struct Config {
	/// Root directories in registration order, each with its owning
	/// namespace.
	pub roots: IndexMap<PathBuf, Arc<Namespace>>,
	pub ignore_patterns: Vec<String>,
	pub ignored: GlobSet,
	pub collapse_patterns: Vec<String>,
	pub collapsed: GlobSet,
	pub eager_load_exclusions: FxHashSet<PathBuf>,
	pub inflector: Arc<dyn Inflector>,
	pub tag: Option<String>,
}

impl Config {
	pub fn new(inflector: Arc<dyn Inflector>) -> Self {
		Config {
			roots: IndexMap::new(),
			ignore_patterns: Vec::new(),
			ignored: GlobSet::empty(),
			collapse_patterns: Vec::new(),
			collapsed: GlobSet::empty(),
			eager_load_exclusions: FxHashSet::default(),
			inflector,
			tag: None,
		}
	}
}

/// Absolutize a path without touching the filesystem.
pub(crate) fn absolutize(path: &Path) -> PathBuf {
	std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Absolutize a glob pattern the same way paths are absolutized, so matchers
/// and scanned paths agree.
fn absolutize_pattern(pattern: &str) -> String {
	if Path::new(pattern).is_absolute() {
		pattern.to_string()
	} else {
		absolutize(Path::new(pattern)).to_string_lossy().into_owned()
	}
}

fn build_matcher(patterns: &[String]) -> Result<GlobSet> {
	let mut builder = GlobSetBuilder::new();
	for pattern in patterns {
		let glob = GlobBuilder::new(pattern)
			.literal_separator(true)
			.build()
			.map_err(|source| Error::InvalidPattern {
				pattern: pattern.clone(),
				source,
			})?;
		builder.add(glob);
	}
	builder.build().map_err(|source| Error::InvalidPattern {
		pattern: String::new(),
		source,
	})
}

impl Loader {
	/// Register a root directory whose symbols resolve under the loader's
	/// root namespace.
	pub fn push_root_dir(&self, path: impl AsRef<Path>) -> Result<()> {
		let ns = self.root.clone();
		self.push_root_dir_in(path, &ns)
	}

	/// Register a root directory whose symbols resolve under `ns`, typically
	/// a permanently named namespace owned by the caller.
	pub fn push_root_dir_in(&self, path: impl AsRef<Path>, ns: &Arc<Namespace>) -> Result<()> {
		let abspath = absolutize(path.as_ref());
		let meta = std::fs::metadata(&abspath).map_err(|_| Error::PathMissing(abspath.clone()))?;
		if !meta.is_dir() {
			return Err(Error::NotADirectory(abspath));
		}
		self.config.write().roots.insert(abspath, ns.clone());
		Ok(())
	}

	/// Ignore a path or glob: matching files and directories are invisible
	/// to the scanner and to `load_file`.
	pub fn ignore(&self, pattern: impl AsRef<str>) -> Result<()> {
		let mut config = self.config.write();
		config.ignore_patterns.push(absolutize_pattern(pattern.as_ref()));
		match build_matcher(&config.ignore_patterns) {
			Ok(matcher) => {
				config.ignored = matcher;
				Ok(())
			}
			Err(error) => {
				config.ignore_patterns.pop();
				Err(error)
			}
		}
	}

	/// Collapse a directory or glob: matching directories are transparent,
	/// their children attach to the parent namespace.
	pub fn collapse(&self, pattern: impl AsRef<str>) -> Result<()> {
		let mut config = self.config.write();
		config.collapse_patterns.push(absolutize_pattern(pattern.as_ref()));
		match build_matcher(&config.collapse_patterns) {
			Ok(matcher) => {
				config.collapsed = matcher;
				Ok(())
			}
			Err(error) => {
				config.collapse_patterns.pop();
				Err(error)
			}
		}
	}

	/// Exclude a file or directory from eager loading (unless forced).
	pub fn do_not_eager_load(&self, path: impl AsRef<Path>) {
		let abspath = absolutize(path.as_ref());
		self.config.write().eager_load_exclusions.insert(abspath);
	}

	/// Enable unload/reload support. Must be called before `setup`.
	pub fn enable_reloading(&self) -> Result<()> {
		if self.state.lock().setup {
			return Err(Error::AlreadySetup);
		}
		self.reloading.store(true, Ordering::Release);
		Ok(())
	}

	pub fn reloading_enabled(&self) -> bool {
		self.reloading.load(Ordering::Acquire)
	}

	/// Replace the naming policy. Must be called before `setup`.
	pub fn set_inflector(&self, inflector: Arc<dyn Inflector>) {
		self.config.write().inflector = inflector;
	}

	/// Human label used in log lines and conflict diagnostics.
	pub fn tag(&self) -> String {
		self.config
			.read()
			.tag
			.clone()
			.unwrap_or_else(|| self.loader_id().to_string())
	}

	pub fn set_tag(&self, tag: impl Into<String>) {
		self.config.write().tag = Some(tag.into());
	}

	/// Does any ignore rule match `path`?
	pub(crate) fn ignores(&self, path: &Path) -> bool {
		self.config.read().ignored.is_match(path)
	}

	/// Root directories that exist and are not ignored, in registration
	/// order.
	pub(crate) fn actual_roots(&self) -> Vec<(PathBuf, Arc<Namespace>)> {
		let config = self.config.read();
		config
			.roots
			.iter()
			.filter(|(dir, _)| !config.ignored.is_match(dir) && dir.is_dir())
			.map(|(dir, ns)| (dir.clone(), ns.clone()))
			.collect()
	}

	/// Rebuild the glob matchers, picking up filesystem changes. Run by
	/// `reload` between unload and setup.
	pub(crate) fn recompute_matchers(&self) -> Result<()> {
		let mut config = self.config.write();
		config.ignored = build_matcher(&config.ignore_patterns)?;
		config.collapsed = build_matcher(&config.collapse_patterns)?;
		Ok(())
	}

	/// Run `f` at the end of every successful `setup`.
	pub fn on_setup(&self, f: impl Fn() + Send + Sync + 'static) {
		self.callbacks.lock().on_setup.push(Arc::new(f));
	}

	/// Run `f` after the binding at `cpath` (loader-relative) resolves.
	pub fn on_load(&self, cpath: impl Into<String>, f: impl Fn(&Value, &Path) + Send + Sync + 'static) {
		self.callbacks
			.lock()
			.on_load
			.entry(cpath.into())
			.or_default()
			.push(Arc::new(f));
	}

	/// Run `f` after any binding resolves.
	pub fn on_load_any(&self, f: impl Fn(&str, &Value, &Path) + Send + Sync + 'static) {
		self.callbacks.lock().on_load_any.push(Arc::new(f));
	}

	/// Run `f` before the loaded symbol at `cpath` is removed by unload.
	pub fn on_unload(&self, cpath: impl Into<String>, f: impl Fn(&Value, &Path) + Send + Sync + 'static) {
		self.callbacks
			.lock()
			.on_unload
			.entry(cpath.into())
			.or_default()
			.push(Arc::new(f));
	}

	/// Run `f` before any loaded symbol is removed by unload.
	pub fn on_unload_any(&self, f: impl Fn(&str, &Value, &Path) + Send + Sync + 'static) {
		self.callbacks.lock().on_unload_any.push(Arc::new(f));
	}
}
