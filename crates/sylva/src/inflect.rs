//! Basename-to-symbol name inflection.

use std::path::Path;

use heck::ToUpperCamelCase;
use rustc_hash::FxHashMap;

/// Naming policy that turns a file or directory basename into a symbol name.
///
/// `abspath` is provided for context so custom policies can special-case
/// individual locations; the default policy ignores it.
pub trait Inflector: Send + Sync {
	fn camelize(&self, basename: &str, abspath: &Path) -> String;
}

/// Default inflector: camel-cases underscored basenames, with a per-basename
/// override table for acronyms and other irregular names.
#[derive(Default)]
pub struct DefaultInflector {
	overrides: FxHashMap<String, String>,
}

impl DefaultInflector {
	pub fn new() -> Self {
		Self::default()
	}

	/// Map `basename` to `symbol` verbatim, bypassing camelization.
	///
	/// ```
	/// # use sylva::DefaultInflector;
	/// # use sylva::Inflector as _;
	/// let mut inflector = DefaultInflector::new();
	/// inflector.inflect("html_parser", "HTMLParser");
	/// assert_eq!(inflector.camelize("html_parser", "html_parser".as_ref()), "HTMLParser");
	/// ```
	pub fn inflect(&mut self, basename: impl Into<String>, symbol: impl Into<String>) {
		self.overrides.insert(basename.into(), symbol.into());
	}
}

impl Inflector for DefaultInflector {
	fn camelize(&self, basename: &str, _abspath: &Path) -> String {
		match self.overrides.get(basename) {
			Some(symbol) => symbol.clone(),
			None => basename.to_upper_camel_case(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn camelize(basename: &str) -> String {
		DefaultInflector::new().camelize(basename, Path::new("/src"))
	}

	#[test]
	fn camelizes_underscored_basenames() {
		assert_eq!(camelize("user"), "User");
		assert_eq!(camelize("users_controller"), "UsersController");
		assert_eq!(camelize("point_3d"), "Point3d");
	}

	#[test]
	fn overrides_win_over_camelization() {
		let mut inflector = DefaultInflector::new();
		inflector.inflect("api", "API");
		assert_eq!(inflector.camelize("api", Path::new("/src/api")), "API");
		assert_eq!(inflector.camelize("app", Path::new("/src/app")), "App");
	}
}
