use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Whether a scanned filesystem entry was a source file or a directory.
///
/// Carried by [`Error::InvalidSymbolName`] so the caller knows which kind of
/// entry produced the unusable name.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PathKind {
	File,
	Directory,
}

impl fmt::Display for PathKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PathKind::File => f.write_str("file"),
			PathKind::Directory => f.write_str("directory"),
		}
	}
}

/// Errors surfaced by loaders, the registry, and namespace resolution.
#[derive(Debug, Error)]
pub enum Error {
	/// Two loaders claim overlapping root directories.
	#[error(
		"loader {loader} wants to manage directory {}, which overlaps {} managed by loader {other}",
		.dir.display(),
		.other_dir.display()
	)]
	ConfigurationConflict {
		loader: String,
		other: String,
		dir: PathBuf,
		other_dir: PathBuf,
	},

	/// The inflector produced a name that is not usable as a symbol.
	#[error(
		"{name:?} inferred from {kind} {} is not a valid symbol name; \
		 ignore the {kind} or one of its parent directories, rename it to \
		 follow the naming conventions, or customize the inflector to handle \
		 this case",
		.path.display()
	)]
	InvalidSymbolName {
		name: String,
		kind: PathKind,
		path: PathBuf,
	},

	/// A resolved file binding did not define the symbol it promised.
	///
	/// The backing path stays marked as loaded so resolution is not retried
	/// in a loop; fixing the source and reloading clears the condition.
	#[error("expected {} to define {cpath}, but it didn't", .path.display())]
	UnexpectedBindingResult { cpath: String, path: PathBuf },

	/// An operation that assumes a prior successful `setup` ran before it.
	#[error("please finish configuration and call setup before this operation")]
	SetupRequired,

	/// `reload` was called without `enable_reloading` having run first.
	#[error("can't reload, please call enable_reloading before setup")]
	ReloadingDisabled,

	/// A configuration call arrived after `setup` already ran.
	#[error("this loader is already set up")]
	AlreadySetup,

	/// The path is outside every root directory of this loader.
	#[error("{} is not managed by this loader", .0.display())]
	PathNotManaged(PathBuf),

	/// The path is inside an ignored path.
	#[error("{} is ignored", .0.display())]
	PathIgnored(PathBuf),

	/// The path is shadowed by an earlier file or an explicit namespace.
	#[error("{} is shadowed", .0.display())]
	PathShadowed(PathBuf),

	/// The path does not exist.
	#[error("{} does not exist", .0.display())]
	PathMissing(PathBuf),

	/// The path was expected to be a directory.
	#[error("{} is not a directory", .0.display())]
	NotADirectory(PathBuf),

	/// The path was expected to be a source file.
	#[error("{} is not a source file", .0.display())]
	NotASourceFile(PathBuf),

	/// A symbol path walked through a name that is not defined.
	#[error("symbol {cpath} is not defined")]
	UnknownSymbol { cpath: String },

	/// The resource-loading primitive failed; the path is not marked loaded,
	/// so the caller may fix the source and dereference again.
	#[error("failed to load {}: {source}", .path.display())]
	Source {
		path: PathBuf,
		#[source]
		source: Box<dyn std::error::Error + Send + Sync>,
	},

	/// An ignore/collapse pattern failed to parse as a glob.
	#[error("invalid glob pattern {pattern:?}: {source}")]
	InvalidPattern {
		pattern: String,
		#[source]
		source: globset::Error,
	},

	/// Filesystem access failed during a scan.
	#[error("i/o error at {}: {source}", .path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}
