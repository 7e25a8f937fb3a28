//! Lazy, filesystem-driven namespace loading.
//!
//! A directory tree is compiled into a tree of namespaces and named
//! bindings; the backing source for each binding is loaded the first time
//! its symbol is dereferenced. Subdirectories become namespaces — implicit
//! ones autovivified because the directory exists, or explicit ones defined
//! by their own source file, which always wins over the directory.
//!
//! # Overview
//!
//! - [`Loader`] owns root directories, scans them into deferred bindings,
//!   and drives the setup / unload / reload and eager-load lifecycles.
//! - [`Registry`] coordinates independent loaders: overlapping-root
//!   conflicts, path-to-loader routing, and alias bookkeeping. Construct one
//!   per process (or per test) and pass it to every loader.
//! - [`Namespace`] is the tree itself: `get`/`at` resolve deferred bindings
//!   on first read; `bind` aliases values — including loader-managed
//!   namespaces — under permanent names.
//! - [`SourceLoader`] is the pluggable resource-loading primitive that
//!   interprets one source file, and [`Inflector`] the pluggable naming
//!   policy turning basenames into symbol names.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use sylva::{Loader, Registry, SourceLoader};
//! # fn demo(source: Arc<dyn SourceLoader>) -> sylva::Result<()> {
//! let registry = Registry::new();
//! let loader = Loader::new(registry, source);
//! loader.push_root_dir("app/models")?;
//! loader.setup()?;
//!
//! // Nothing is loaded yet; the first dereference loads `app/models/user.*`.
//! let user = loader.root().at("User")?;
//! # let _ = user;
//! # Ok(())
//! # }
//! ```

mod detect;
mod error;
mod inflect;
mod loader;
mod namespace;
mod registry;
mod source;

pub use error::{Error, PathKind, Result};
pub use inflect::{DefaultInflector, Inflector};
pub use loader::Loader;
pub use namespace::{Namespace, NsId, Value};
pub use registry::Registry;
pub use source::{SourceError, SourceLoader};
