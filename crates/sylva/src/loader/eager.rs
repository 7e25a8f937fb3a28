//! Eager loading: resolve every still-pending binding up front.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::error::{Error, PathKind, Result};
use crate::namespace::{Namespace, Value};

use super::Loader;
use super::config::absolutize;
use super::scan::ScanCtx;

impl Loader {
	/// Resolve every pending binding under every root directory, in scan
	/// order. Skips the eager-load exclusion set unless `force` is set;
	/// shadowed files are always skipped. Idempotent once fully completed.
	pub fn eager_load(&self, force: bool) -> Result<()> {
		let _lifecycle = self.lifecycle.lock();
		{
			let state = self.state.lock();
			if state.eager_loaded {
				return Ok(());
			}
			if !state.setup {
				return Err(Error::SetupRequired);
			}
		}
		tracing::debug!(loader = %self.tag(), "eager load start");

		let ctx = self.scan_ctx();
		let exclusions = { self.config.read().eager_load_exclusions.clone() };
		for (dir, ns) in self.actual_roots() {
			self.eager_load_tree(&ctx, &exclusions, &dir, ns, force)?;
		}

		{
			let mut state = self.state.lock();
			for dir in state.autoloaded_dirs.drain(..) {
				self.registry.unregister_inflight(&dir);
			}
			state.eager_loaded = true;
		}
		tracing::debug!(loader = %self.tag(), "eager load end");
		Ok(())
	}

	/// Eager load the subtree rooted at a managed directory.
	pub fn eager_load_dir(&self, path: impl AsRef<Path>) -> Result<()> {
		if !self.state.lock().setup {
			return Err(Error::SetupRequired);
		}
		let abspath = absolutize(path.as_ref());
		if !abspath.is_dir() {
			return Err(Error::NotADirectory(abspath));
		}

		let ctx = self.scan_ctx();
		let (roots, exclusions) = {
			let config = self.config.read();
			(config.roots.clone(), config.eager_load_exclusions.clone())
		};

		let mut chain = Vec::new();
		let mut found_root = None;
		let mut current = Some(abspath.as_path());
		while let Some(dir) = current {
			if ctx.ignored.is_match(dir) || exclusions.contains(dir) {
				return Ok(());
			}
			if let Some(ns) = roots.get(dir) {
				found_root = Some(ns.clone());
				break;
			}
			chain.push(dir.to_path_buf());
			current = dir.parent();
		}
		let Some(mut ns) = found_root else {
			return Err(Error::PathNotManaged(abspath));
		};

		if self.state.lock().eager_loaded {
			return Ok(());
		}

		// Innermost-first chain, walked outside in.
		for dir in chain.iter().rev() {
			if ctx.collapsed.is_match(dir) {
				continue;
			}
			let basename = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
			let cname = self.cname_for(&ctx, basename, dir, PathKind::Directory)?;
			// Can be undefined if the subtree has no source files yet; the
			// directory is managed all the same.
			match ns.get(&cname)? {
				Some(Value::Namespace(child)) => ns = child,
				_ => return Ok(()),
			}
		}
		self.eager_load_tree(&ctx, &exclusions, &abspath, ns, false)
	}

	/// Eager load the subtree corresponding to a namespace. A no-op when the
	/// namespace is not managed by this loader or full eager loading already
	/// completed.
	pub fn eager_load_namespace(&self, ns: &Arc<Namespace>) -> Result<()> {
		if !self.state.lock().setup {
			return Err(Error::SetupRequired);
		}
		if self.state.lock().eager_loaded {
			return Ok(());
		}

		let ctx = self.scan_ctx();
		let exclusions = { self.config.read().eager_load_exclusions.clone() };
		for (root_dir, root_ns) in self.actual_roots() {
			if Arc::ptr_eq(ns, &root_ns) {
				self.eager_load_tree(&ctx, &exclusions, &root_dir, root_ns, false)?;
				continue;
			}
			let suffix = if Arc::ptr_eq(&root_ns, &self.root) {
				self.registry
					.namespace_cpath(ns.id())
					.and_then(|(cpath, owner)| (owner == self.id).then_some(cpath))
					.flatten()
			} else {
				root_ns.permanent_name().and_then(|root_name| {
					ns.permanent_name()
						.and_then(|name| name.strip_prefix(&format!("{root_name}::")).map(str::to_string))
				})
			};
			let Some(suffix) = suffix else {
				continue;
			};
			self.eager_load_child_namespace(&ctx, &exclusions, &root_dir, ns, &suffix)?;
		}
		Ok(())
	}

	/// Resolve exactly one managed file's binding.
	pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
		let abspath = absolutize(path.as_ref());
		let Ok(meta) = std::fs::metadata(&abspath) else {
			return Err(Error::PathMissing(abspath));
		};
		let ctx = self.scan_ctx();
		if meta.is_dir() || abspath.extension().and_then(|e| e.to_str()) != Some(ctx.ext.as_str()) {
			return Err(Error::NotASourceFile(abspath));
		}
		if ctx.ignored.is_match(&abspath) {
			return Err(Error::PathIgnored(abspath));
		}

		let stem = abspath
			.file_name()
			.and_then(|n| n.to_str())
			.and_then(|n| n.strip_suffix(&format!(".{}", ctx.ext)))
			.unwrap_or_default();
		let base_cname = self.cname_for(&ctx, stem, &abspath, PathKind::File)?;

		let roots = { self.config.read().roots.clone() };
		let mut chain = Vec::new();
		let mut found_root = None;
		let mut current = abspath.parent();
		while let Some(dir) = current {
			if ctx.ignored.is_match(dir) {
				return Err(Error::PathIgnored(abspath));
			}
			if let Some(ns) = roots.get(dir) {
				found_root = Some(ns.clone());
				break;
			}
			chain.push(dir.to_path_buf());
			current = dir.parent();
		}
		let Some(mut ns) = found_root else {
			return Err(Error::PathNotManaged(abspath));
		};

		for dir in chain.iter().rev() {
			if ctx.collapsed.is_match(dir) {
				continue;
			}
			let basename = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
			let cname = self.cname_for(&ctx, basename, dir, PathKind::Directory)?;
			match ns.get(&cname)? {
				Some(Value::Namespace(child)) => ns = child,
				_ => {
					return Err(Error::UnknownSymbol {
						cpath: self.match_key(&ns, &cname),
					});
				}
			}
		}
		if self.state.lock().shadowed.contains(&abspath) {
			return Err(Error::PathShadowed(abspath));
		}
		match ns.get(&base_cname)? {
			Some(_) => Ok(()),
			None => Err(Error::UnknownSymbol {
				cpath: self.match_key(&ns, &base_cname),
			}),
		}
	}

	fn eager_load_tree(
		&self,
		ctx: &ScanCtx,
		exclusions: &FxHashSet<PathBuf>,
		dir: &Path,
		ns: Arc<Namespace>,
		force: bool,
	) -> Result<()> {
		if !force && self.excluded_from_eager_load(exclusions, dir) {
			return Ok(());
		}
		tracing::debug!(dir = %dir.display(), "eager load directory start");

		let mut queue = VecDeque::new();
		queue.push_back((dir.to_path_buf(), ns));
		while let Some((dir, ns)) = queue.pop_front() {
			for entry in self.ls(ctx, &dir)? {
				if !force && exclusions.contains(&entry.abspath) {
					continue;
				}
				if entry.is_dir {
					if ctx.collapsed.is_match(&entry.abspath) {
						queue.push_back((entry.abspath, ns.clone()));
					} else {
						let cname = self.cname_for(ctx, &entry.basename, &entry.abspath, PathKind::Directory)?;
						match ns.get(&cname)? {
							Some(Value::Namespace(child)) => queue.push_back((entry.abspath, child)),
							_ => tracing::debug!(
								dir = %entry.abspath.display(),
								"no namespace for directory, skipped"
							),
						}
					}
				} else {
					let pending = {
						let state = self.state.lock();
						if state.shadowed.contains(&entry.abspath) {
							None
						} else {
							state
								.autoloads
								.get(&entry.abspath)
								.map(|binding| (binding.ns.clone(), binding.sym.clone()))
						}
					};
					if let Some((ns_weak, sym)) = pending {
						if let Some(parent) = ns_weak.upgrade() {
							parent.get(&sym)?;
						}
					}
				}
			}
		}

		tracing::debug!(dir = %dir.display(), "eager load directory end");
		Ok(())
	}

	/// Locate the directories matching `suffix` segment by segment under
	/// `root_dir`, looking through collapsed directories, and eager load each
	/// with `child_ns` as the corresponding namespace.
	fn eager_load_child_namespace(
		&self,
		ctx: &ScanCtx,
		exclusions: &FxHashSet<PathBuf>,
		root_dir: &Path,
		child_ns: &Arc<Namespace>,
		suffix: &str,
	) -> Result<()> {
		let mut dirs = vec![root_dir.to_path_buf()];
		let mut next_dirs = Vec::new();
		for segment in suffix.split("::") {
			while let Some(dir) = dirs.pop() {
				for entry in self.ls(ctx, &dir)? {
					if !entry.is_dir {
						continue;
					}
					if ctx.collapsed.is_match(&entry.abspath) {
						dirs.push(entry.abspath);
					} else if ctx.inflector.camelize(&entry.basename, &entry.abspath) == segment {
						next_dirs.push(entry.abspath);
					}
				}
			}
			if next_dirs.is_empty() {
				return Ok(());
			}
			dirs = std::mem::take(&mut next_dirs);
		}
		for dir in dirs {
			self.eager_load_tree(ctx, exclusions, &dir, child_ns.clone(), false)?;
		}
		Ok(())
	}

	fn excluded_from_eager_load(&self, exclusions: &FxHashSet<PathBuf>, dir: &Path) -> bool {
		let mut current = Some(dir);
		while let Some(dir) = current {
			if exclusions.contains(dir) {
				return true;
			}
			current = dir.parent();
		}
		false
	}
}
