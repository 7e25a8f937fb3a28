//! Scanning and deferred-binding resolution.

mod support;

use std::sync::Arc;

use support::TestSource;
use sylva::{Error, Loader, Registry, Value};

#[test]
fn resolution_is_lazy_and_happens_once() {
	let dir = support::tree(&["app/user.def", "app/account.def"]);
	let user = dir.path().join("app/user.def");
	let source = TestSource::new();
	source.define_value(&user, "User", "a user");

	let loader = Loader::new(Registry::new(), source.clone());
	loader.push_root_dir(dir.path().join("app")).unwrap();
	loader.setup().unwrap();

	assert_eq!(source.load_count(&user), 0);
	let value = loader.root().at("User").unwrap().unwrap();
	assert_eq!(*value.downcast::<&str>().unwrap(), "a user");
	assert_eq!(source.load_count(&user), 1);

	// Subsequent reads hit the bound value.
	loader.root().at("User").unwrap().unwrap();
	assert_eq!(source.load_count(&user), 1);
	assert_eq!(source.load_count(dir.path().join("app/account.def")), 0);
}

#[test]
fn setup_is_idempotent() {
	let dir = support::tree(&["app/user.def"]);
	let loader = Loader::new(Registry::new(), TestSource::new());
	loader.push_root_dir(dir.path().join("app")).unwrap();
	loader.setup().unwrap();
	loader.setup().unwrap();
	assert!(loader.root().at("User").unwrap().is_some());
}

#[test]
fn directories_autovivify_namespaces() {
	let dir = support::tree(&["app/admin/role.def"]);
	let role = dir.path().join("app/admin/role.def");
	let source = TestSource::new();
	source.define_value(&role, "Role", "superuser");

	let loader = Loader::new(Registry::new(), source.clone());
	loader.push_root_dir(dir.path().join("app")).unwrap();
	loader.setup().unwrap();

	let admin = loader.root().at("Admin").unwrap().unwrap();
	assert!(admin.is_namespace());
	// Autovivification loads no file.
	assert_eq!(source.load_count(&role), 0);

	let value = loader.root().at("Admin::Role").unwrap().unwrap();
	assert_eq!(*value.downcast::<&str>().unwrap(), "superuser");
	assert_eq!(source.load_count(&role), 1);
}

#[test]
fn directories_without_source_files_define_nothing() {
	let dir = support::tree(&["app/user.def", "app/assets/", "app/docs/readme.txt"]);
	let loader = Loader::new(Registry::new(), TestSource::new());
	loader.push_root_dir(dir.path().join("app")).unwrap();
	loader.setup().unwrap();
	assert!(loader.root().at("Assets").unwrap().is_none());
	assert!(loader.root().at("Docs").unwrap().is_none());
}

#[test]
fn collapsed_directories_are_transparent() {
	let dir = support::tree(&["app/actions/wave.def", "app/admin/actions/poke.def"]);
	let loader = Loader::new(Registry::new(), TestSource::new());
	loader.push_root_dir(dir.path().join("app")).unwrap();
	loader
		.collapse(dir.path().join("app/actions").to_str().unwrap())
		.unwrap();
	loader
		.collapse(format!("{}/app/*/actions", dir.path().display()))
		.unwrap();
	loader.setup().unwrap();

	assert!(loader.root().at("Wave").unwrap().is_some());
	assert!(loader.root().at("Admin::Poke").unwrap().is_some());
	assert!(loader.root().at("Actions").unwrap().is_none());
}

#[test]
fn ignored_paths_are_invisible() {
	let dir = support::tree(&["app/user.def", "app/skip.def", "app/tmp/junk.def"]);
	let loader = Loader::new(Registry::new(), TestSource::new());
	loader.push_root_dir(dir.path().join("app")).unwrap();
	loader.ignore(dir.path().join("app/skip.def").to_str().unwrap()).unwrap();
	loader.ignore(dir.path().join("app/tmp").to_str().unwrap()).unwrap();
	loader.setup().unwrap();

	assert!(loader.root().at("User").unwrap().is_some());
	assert!(loader.root().at("Skip").unwrap().is_none());
	assert!(loader.root().at("Tmp").unwrap().is_none());
}

#[test]
fn invalid_symbol_names_abort_setup_and_roll_back() {
	let dir = support::tree(&["app/user.def", "app/1bad.def"]);
	let loader = Loader::new(Registry::new(), TestSource::new());
	loader.push_root_dir(dir.path().join("app")).unwrap();

	let error = loader.setup().unwrap_err();
	assert!(matches!(error, Error::InvalidSymbolName { .. }));
	let message = error.to_string();
	assert!(message.contains("1bad.def"));
	assert!(message.contains("file"));

	// The failed call left no bindings behind.
	assert!(loader.root().peek("User").is_none());

	// Ignoring the offender is a valid remediation.
	loader.ignore(dir.path().join("app/1bad.def").to_str().unwrap()).unwrap();
	loader.setup().unwrap();
	assert!(loader.root().at("User").unwrap().is_some());
}

#[test]
fn custom_inflector_overrides_names() {
	let dir = support::tree(&["app/api.def"]);
	let source = TestSource::new();
	source.define_value(dir.path().join("app/api.def"), "API", "v2");

	let loader = Loader::new(Registry::new(), source);
	let mut inflector = sylva::DefaultInflector::new();
	inflector.inflect("api", "API");
	loader.set_inflector(Arc::new(inflector));
	loader.push_root_dir(dir.path().join("app")).unwrap();
	loader.setup().unwrap();

	assert!(loader.root().at("API").unwrap().is_some());
	assert!(loader.root().at("Api").unwrap().is_none());
}

#[test]
fn first_registered_root_wins_and_shadows_the_rest() {
	let dir = support::tree(&["one/user.def", "two/user.def"]);
	let first = dir.path().join("one/user.def");
	let second = dir.path().join("two/user.def");
	let source = TestSource::new();
	source.define_value(&first, "User", "first");
	source.define_value(&second, "User", "second");

	let loader = Loader::new(Registry::new(), source.clone());
	loader.push_root_dir(dir.path().join("one")).unwrap();
	loader.push_root_dir(dir.path().join("two")).unwrap();
	loader.setup().unwrap();

	let value = loader.root().at("User").unwrap().unwrap();
	assert_eq!(*value.downcast::<&str>().unwrap(), "first");
	assert_eq!(source.load_count(&second), 0);

	loader.eager_load(false).unwrap();
	assert_eq!(source.load_count(&first), 1);
	assert_eq!(source.load_count(&second), 0);
}

#[test]
fn explicit_namespace_wins_when_directory_is_scanned_first() {
	// "hotel" sorts before "hotel.def", so the directory is seen first and
	// its autovivification binding must be promoted.
	let dir = support::tree(&["app/hotel/pricing.def", "app/hotel.def"]);
	let hotel = dir.path().join("app/hotel.def");
	let source = TestSource::new();
	source.define(&hotel, |ns| {
		let hotel = ns.define_namespace("Hotel");
		hotel.define("Kind", "explicit");
	});

	let loader = Loader::new(Registry::new(), source.clone());
	loader.push_root_dir(dir.path().join("app")).unwrap();
	loader.setup().unwrap();

	let value = loader.root().at("Hotel").unwrap().unwrap();
	assert!(value.is_namespace());
	assert_eq!(source.load_count(&hotel), 1);

	// The directory's children are reachable through the namespace the
	// file's source created.
	let kind = loader.root().at("Hotel::Kind").unwrap().unwrap();
	assert_eq!(*kind.downcast::<&str>().unwrap(), "explicit");
	assert!(loader.root().at("Hotel::Pricing").unwrap().is_some());
	assert_eq!(source.load_count(dir.path().join("app/hotel/pricing.def")), 1);
}

#[test]
fn explicit_namespace_wins_when_file_is_scanned_first() {
	// Two roots force the file to be discovered before the directory.
	let dir = support::tree(&["one/hotel.def", "two/hotel/pricing.def"]);
	let hotel = dir.path().join("one/hotel.def");
	let source = TestSource::new();
	source.define(&hotel, |ns| {
		ns.define_namespace("Hotel");
	});

	let loader = Loader::new(Registry::new(), source.clone());
	loader.push_root_dir(dir.path().join("one")).unwrap();
	loader.push_root_dir(dir.path().join("two")).unwrap();
	loader.setup().unwrap();

	assert!(loader.root().at("Hotel::Pricing").unwrap().is_some());
	assert_eq!(source.load_count(&hotel), 1);
	assert_eq!(source.load_count(dir.path().join("two/hotel/pricing.def")), 1);
}

#[test]
fn file_that_breaks_its_promise_is_an_error() {
	let dir = support::tree(&["app/ghost.def"]);
	let ghost = dir.path().join("app/ghost.def");
	let source = TestSource::new();
	source.define_nothing(&ghost);

	let loader = Loader::new(Registry::new(), source.clone());
	loader.push_root_dir(dir.path().join("app")).unwrap();
	loader.setup().unwrap();

	let error = loader.root().at("Ghost").unwrap_err();
	assert!(matches!(error, Error::UnexpectedBindingResult { .. }));
	assert!(error.to_string().contains("Ghost"));

	// The path stays loaded so resolution is not retried in a loop; the
	// symbol simply stays undefined.
	use sylva::SourceLoader as _;
	assert!(source.loaded(&ghost));
	assert!(loader.root().at("Ghost").unwrap().is_none());
}

#[test]
fn failed_loads_are_not_marked_loaded() {
	let dir = support::tree(&["app/flaky.def"]);
	let flaky = dir.path().join("app/flaky.def");
	let source = TestSource::new();
	source.fail(&flaky);

	let loader = Loader::new(Registry::new(), source.clone());
	loader.push_root_dir(dir.path().join("app")).unwrap();
	loader.setup().unwrap();

	let error = loader.root().at("Flaky").unwrap_err();
	assert!(matches!(error, Error::Source { .. }));
	use sylva::SourceLoader as _;
	assert!(!source.loaded(&flaky));
}

#[test]
fn values_bound_into_permanent_namespaces_get_names() {
	let dir = support::tree(&["app/admin/role.def"]);
	let registry = Registry::new();
	let loader = Loader::new(registry.clone(), TestSource::new());
	loader.push_root_dir(dir.path().join("app")).unwrap();
	loader.setup().unwrap();

	let admin = loader.root().at("Admin").unwrap().unwrap();
	let admin = admin.as_namespace().unwrap().clone();
	assert!(admin.permanent_name().is_none());

	let app = sylva::Namespace::root(&registry, "App");
	app.bind("Admin", Value::Namespace(admin.clone()));
	assert_eq!(admin.permanent_name().as_deref(), Some("App::Admin"));
}
