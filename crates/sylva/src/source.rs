//! Interface to the resource-loading primitive.
//!
//! The loader never interprets source files itself; it delegates to a
//! [`SourceLoader`] and wraps every invocation with its own bookkeeping
//! (binding verification, unload records, explicit-namespace events).

use std::path::Path;
use std::sync::Arc;

use crate::namespace::Namespace;

/// Error type produced by a [`SourceLoader`].
pub type SourceError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The resource-loading primitive.
///
/// Implementations interpret one source file and define its symbols in the
/// given namespace. The contract mirrors a `require`-style loader:
///
/// - `load` is invoked at most once per absolute path between a loader's
///   `setup` and the next `unload`; on success the path must be recorded as
///   loaded, on failure it must not be (so the caller can retry after fixing
///   the source).
/// - `loaded` answers whether a path has been loaded already.
/// - `forget` drops a path from the loaded cache; unload invalidates exactly
///   the paths it touched through this.
pub trait SourceLoader: Send + Sync {
	/// Extension identifying source files under the managed trees, without
	/// the leading dot.
	fn extension(&self) -> &str;

	/// Load `path`, defining its symbols in `ns`.
	fn load(&self, path: &Path, ns: &Arc<Namespace>) -> Result<(), SourceError>;

	/// Has `path` been loaded already?
	fn loaded(&self, path: &Path) -> bool;

	/// Drop `path` from the loaded cache so it can be loaded again.
	fn forget(&self, path: &Path);
}
