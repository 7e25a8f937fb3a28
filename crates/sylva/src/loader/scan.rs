//! The directory-to-namespace compiler.
//!
//! Scans root directories in stable lexicographic order, turning source
//! files into file bindings and subdirectories into autovivification
//! bindings, with first-writer-wins shadowing and implicit→explicit
//! promotion when a file and a directory want the same symbol.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::GlobSet;

use crate::error::{Error, PathKind, Result};
use crate::inflect::Inflector;
use crate::namespace::{Deferred, DeferredKind, Namespace, Probe};

use super::{Loader, PendingBinding, ScanState};

/// Immutable snapshot of the scan-relevant configuration, taken once per
/// scan so no configuration lock is held while walking the filesystem.
pub(crate) struct ScanCtx {
	pub ignored: GlobSet,
	pub collapsed: GlobSet,
	pub ext: String,
	pub inflector: Arc<dyn Inflector>,
}

pub(crate) struct DirEntry {
	pub basename: String,
	pub abspath: PathBuf,
	pub is_dir: bool,
}

/// A usable symbol name: leading ASCII uppercase letter, then alphanumerics
/// and underscores.
fn valid_symbol_name(name: &str) -> bool {
	let mut chars = name.chars();
	matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
		&& chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Loader {
	pub(crate) fn scan_ctx(&self) -> ScanCtx {
		let source = self.source.read().clone();
		let config = self.config.read();
		ScanCtx {
			ignored: config.ignored.clone(),
			collapsed: config.collapsed.clone(),
			ext: source.extension().to_string(),
			inflector: config.inflector.clone(),
		}
	}

	/// Compile `dir` into deferred bindings under `parent`. With no parent,
	/// the walk only registers managed paths and validates names; bindings
	/// for those entries are set later, when their namespace object exists.
	pub(crate) fn scan_dir(
		&self,
		ctx: &ScanCtx,
		state: &mut ScanState,
		dir: &Path,
		parent: Option<&Arc<Namespace>>,
	) -> Result<()> {
		for entry in self.ls(ctx, dir)? {
			if entry.is_dir {
				if ctx.collapsed.is_match(&entry.abspath) {
					self.scan_dir(ctx, state, &entry.abspath, parent)?;
				} else {
					let cname = self.cname_for(ctx, &entry.basename, &entry.abspath, PathKind::Directory)?;
					if let Some(parent) = parent {
						self.scan_subdir(ctx, state, parent, &cname, &entry.abspath)?;
					}
					self.scan_dir(ctx, state, &entry.abspath, None)?;
				}
			} else {
				let stem = entry
					.basename
					.strip_suffix(&format!(".{}", ctx.ext))
					.unwrap_or(&entry.basename);
				let cname = self.cname_for(ctx, stem, &entry.abspath, PathKind::File)?;
				if let Some(parent) = parent {
					self.scan_file(state, parent, &cname, &entry.abspath);
				}
				self.registry.register_path(self.id, &entry.abspath);
			}
		}
		Ok(())
	}

	fn scan_file(&self, state: &mut ScanState, parent: &Arc<Namespace>, cname: &str, file: &Path) {
		match parent.probe(cname) {
			Probe::Deferred(existing) if existing.loader_id == self.id => match &existing.kind {
				DeferredKind::Dir => self.promote(state, parent, cname, &existing, file),
				DeferredKind::File | DeferredKind::Alias { .. } => {
					state.shadowed.insert(file.to_path_buf());
					tracing::debug!(
						file = %file.display(),
						winner = %existing.abspath.display(),
						"file ignored because an earlier file has precedence"
					);
				}
			},
			Probe::Deferred(_) | Probe::Occupied(_) => {
				state.shadowed.insert(file.to_path_buf());
				tracing::debug!(
					file = %file.display(),
					cpath = %self.match_key(parent, cname),
					"file ignored because the symbol is already defined"
				);
			}
			Probe::Vacant => self.install_binding(state, parent, cname, file, DeferredKind::File),
		}
	}

	fn scan_subdir(
		&self,
		ctx: &ScanCtx,
		state: &mut ScanState,
		parent: &Arc<Namespace>,
		cname: &str,
		subdir: &Path,
	) -> Result<()> {
		match parent.probe(cname) {
			Probe::Deferred(existing) if existing.loader_id == self.id => {
				let cpath = self.rel_cpath(parent, cname);
				if matches!(existing.kind, DeferredKind::File) {
					// A file for this symbol was scanned first: explicit
					// namespace whose definition was seen before its
					// directory. Registering is idempotent; the binding
					// keeps pointing at the file.
					self.registry.explicit.register(
						self.match_key(parent, cname),
						cpath.clone(),
						self.weak_self.clone(),
						self.id,
					);
				}
				state.namespace_dirs.entry(cpath).or_default().push(subdir.to_path_buf());
			}
			Probe::Vacant => {
				let cpath = self.rel_cpath(parent, cname);
				state.namespace_dirs.entry(cpath).or_default().push(subdir.to_path_buf());
				self.install_binding(state, parent, cname, subdir, DeferredKind::Dir);
			}
			Probe::Occupied(value) => match value.as_namespace() {
				Some(ns) => {
					// The namespace object already exists, descend now.
					tracing::debug!(
						cpath = %self.match_key(parent, cname),
						dir = %subdir.display(),
						"namespace already exists, descending"
					);
					let ns = ns.clone();
					self.scan_dir(ctx, state, subdir, Some(&ns))?;
				}
				None => {
					tracing::warn!(
						cpath = %self.match_key(parent, cname),
						dir = %subdir.display(),
						"symbol is bound to a non-namespace value, directory skipped"
					);
				}
			},
			Probe::Deferred(_) => {
				tracing::warn!(
					cpath = %self.match_key(parent, cname),
					dir = %subdir.display(),
					"symbol is pending in another loader, directory skipped"
				);
			}
		}
		Ok(())
	}

	/// A file and an autovivification binding want the same symbol: the file
	/// wins. The directory binding is discarded, the symbol rebinds to the
	/// file, and a wait entry ensures the directory's children are scanned
	/// the moment the file's source defines the namespace.
	fn promote(&self, state: &mut ScanState, parent: &Arc<Namespace>, cname: &str, old: &Arc<Deferred>, file: &Path) {
		let deferred = Arc::new(Deferred {
			abspath: file.to_path_buf(),
			kind: DeferredKind::File,
			loader: self.weak_self.clone(),
			loader_id: self.id,
		});
		if !parent.promote_deferred(cname, old, deferred.clone()) {
			// The slot changed underneath us; the next probe decides.
			return;
		}
		state.autoloads.shift_remove(&old.abspath);
		self.registry.unregister_inflight(&old.abspath);
		tracing::debug!(
			cpath = %self.match_key(parent, cname),
			file = %file.display(),
			"earlier autovivification discarded, symbol is an explicit namespace"
		);
		state.autoloads.insert(
			file.to_path_buf(),
			PendingBinding {
				ns: Arc::downgrade(parent),
				sym: cname.to_string(),
				deferred,
			},
		);
		self.registry.register_inflight(self.id, file);
		self.registry.explicit.register(
			self.match_key(parent, cname),
			self.rel_cpath(parent, cname),
			self.weak_self.clone(),
			self.id,
		);
	}

	fn install_binding(
		&self,
		state: &mut ScanState,
		parent: &Arc<Namespace>,
		cname: &str,
		abspath: &Path,
		kind: DeferredKind,
	) {
		let deferred = Arc::new(Deferred {
			abspath: abspath.to_path_buf(),
			kind,
			loader: self.weak_self.clone(),
			loader_id: self.id,
		});
		if !parent.install_deferred(cname, deferred.clone()) {
			return;
		}
		tracing::trace!(
			cpath = %self.match_key(parent, cname),
			path = %abspath.display(),
			"autoload set"
		);
		state.autoloads.insert(
			abspath.to_path_buf(),
			PendingBinding {
				ns: Arc::downgrade(parent),
				sym: cname.to_string(),
				deferred,
			},
		);
		self.registry.register_inflight(self.id, abspath);
	}

	pub(crate) fn cname_for(&self, ctx: &ScanCtx, basename: &str, abspath: &Path, kind: PathKind) -> Result<String> {
		let name = ctx.inflector.camelize(basename, abspath);
		if valid_symbol_name(&name) {
			Ok(name)
		} else {
			Err(Error::InvalidSymbolName {
				name,
				kind,
				path: abspath.to_path_buf(),
			})
		}
	}

	/// List `dir` in stable lexicographic order: source files by extension,
	/// plus subdirectories that transitively contain at least one source
	/// file. Hidden and ignored entries are pruned before inflection, so
	/// ignoring a path is a valid remediation for a bad name.
	pub(crate) fn ls(&self, ctx: &ScanCtx, dir: &Path) -> Result<Vec<DirEntry>> {
		let entries = fs::read_dir(dir).map_err(|source| Error::Io {
			path: dir.to_path_buf(),
			source,
		})?;
		let mut out = Vec::new();
		for entry in entries {
			let entry = entry.map_err(|source| Error::Io {
				path: dir.to_path_buf(),
				source,
			})?;
			let name = entry.file_name();
			let Some(basename) = name.to_str() else {
				tracing::warn!(dir = %dir.display(), "skipping entry with non-UTF-8 name");
				continue;
			};
			if basename.starts_with('.') {
				continue;
			}
			let abspath = dir.join(basename);
			if ctx.ignored.is_match(&abspath) {
				continue;
			}
			// Follows symlinks; dangling links are skipped.
			let Ok(meta) = fs::metadata(&abspath) else {
				tracing::trace!(path = %abspath.display(), "skipping unreadable entry");
				continue;
			};
			if meta.is_dir() {
				if self.dir_has_source_files(ctx, &abspath) {
					out.push(DirEntry {
						basename: basename.to_string(),
						abspath,
						is_dir: true,
					});
				}
			} else if meta.is_file() && abspath.extension().and_then(|e| e.to_str()) == Some(ctx.ext.as_str()) {
				out.push(DirEntry {
					basename: basename.to_string(),
					abspath,
					is_dir: false,
				});
			}
		}
		out.sort_by(|a, b| a.basename.cmp(&b.basename));
		Ok(out)
	}

	fn dir_has_source_files(&self, ctx: &ScanCtx, dir: &Path) -> bool {
		let Ok(entries) = fs::read_dir(dir) else {
			return false;
		};
		for entry in entries.flatten() {
			let name = entry.file_name();
			let Some(basename) = name.to_str() else {
				continue;
			};
			if basename.starts_with('.') {
				continue;
			}
			let abspath = dir.join(basename);
			if ctx.ignored.is_match(&abspath) {
				continue;
			}
			let Ok(meta) = fs::metadata(&abspath) else {
				continue;
			};
			if meta.is_file() {
				if abspath.extension().and_then(|e| e.to_str()) == Some(ctx.ext.as_str()) {
					return true;
				}
			} else if meta.is_dir() && self.dir_has_source_files(ctx, &abspath) {
				return true;
			}
		}
		false
	}
}
