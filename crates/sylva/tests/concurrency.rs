//! Concurrent first dereferences resolve exactly once.

mod support;

use std::sync::{Arc, Barrier};

use support::TestSource;
use sylva::{Loader, Registry, Value};

const THREADS: usize = 50;

#[test]
fn concurrent_autovivification_creates_one_namespace() {
	let dir = support::tree(&["app/admin/role.def"]);
	let source = TestSource::new();
	let loader = Loader::new(Registry::new(), source.clone());
	loader.push_root_dir(dir.path().join("app")).unwrap();
	loader.setup().unwrap();

	let barrier = Barrier::new(THREADS);
	let observed: Vec<Value> = std::thread::scope(|scope| {
		let handles: Vec<_> = (0..THREADS)
			.map(|_| {
				let barrier = &barrier;
				let root = loader.root().clone();
				scope.spawn(move || {
					barrier.wait();
					root.at("Admin").unwrap().unwrap()
				})
			})
			.collect();
		handles.into_iter().map(|h| h.join().unwrap()).collect()
	});

	// Every thread observed the identical, fully-initialized object.
	let first = observed[0].as_namespace().unwrap();
	for value in &observed {
		assert!(Arc::ptr_eq(value.as_namespace().unwrap(), first));
	}

	// Descent into the directory ran once: the child binding is there and
	// resolves normally.
	assert!(loader.root().at("Admin::Role").unwrap().is_some());
	assert_eq!(source.load_count(dir.path().join("app/admin/role.def")), 1);
}

#[test]
fn concurrent_file_dereferences_load_once() {
	let dir = support::tree(&["app/user.def"]);
	let user = dir.path().join("app/user.def");
	let source = TestSource::new();
	source.define_value(&user, "User", "singleton");

	let loader = Loader::new(Registry::new(), source.clone());
	loader.push_root_dir(dir.path().join("app")).unwrap();
	loader.setup().unwrap();

	let barrier = Barrier::new(THREADS);
	std::thread::scope(|scope| {
		for _ in 0..THREADS {
			let barrier = &barrier;
			let root = loader.root().clone();
			scope.spawn(move || {
				barrier.wait();
				let value = root.at("User").unwrap().unwrap();
				assert_eq!(*value.downcast::<&str>().unwrap(), "singleton");
			});
		}
	});

	assert_eq!(source.load_count(&user), 1);
}

#[test]
fn concurrent_dereferences_across_namespaces() {
	let dir = support::tree(&[
		"app/a/one.def",
		"app/b/two.def",
		"app/c/three.def",
		"app/user.def",
	]);
	let source = TestSource::new();
	let loader = Loader::new(Registry::new(), source.clone());
	loader.push_root_dir(dir.path().join("app")).unwrap();
	loader.setup().unwrap();

	let paths = ["A::One", "B::Two", "C::Three", "User"];
	let barrier = Barrier::new(THREADS);
	std::thread::scope(|scope| {
		for i in 0..THREADS {
			let barrier = &barrier;
			let root = loader.root().clone();
			let path = paths[i % paths.len()];
			scope.spawn(move || {
				barrier.wait();
				assert!(root.at(path).unwrap().is_some());
			});
		}
	});

	for file in ["app/a/one.def", "app/b/two.def", "app/c/three.def", "app/user.def"] {
		assert_eq!(source.load_count(dir.path().join(file)), 1, "{file}");
	}
}
