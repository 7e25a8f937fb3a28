//! The namespace tree.
//!
//! Symbols live in binding tables owned by [`Namespace`] objects. A binding
//! is either a concrete [`Value`] or a deferred thunk that resolves on first
//! read: `Pending → Resolving → bound` (or removal when resolution fails).
//! Per-slot gates serialize concurrent first reads so the backing load runs
//! exactly once and every racing reader observes the winner's value.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::Result;
use crate::loader::Loader;
use crate::registry::{LoaderId, Registry};

static NEXT_NS_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a namespace object, stable for its whole lifetime and never
/// reused within a process.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NsId(u64);

impl NsId {
	fn next() -> Self {
		NsId(NEXT_NS_ID.fetch_add(1, Ordering::Relaxed))
	}
}

/// A value bound to a symbol: either a child namespace or an opaque leaf
/// produced by the source loader.
#[derive(Clone)]
pub enum Value {
	Namespace(Arc<Namespace>),
	Leaf(Arc<dyn Any + Send + Sync>),
}

impl Value {
	pub fn leaf<T: Any + Send + Sync>(value: T) -> Self {
		Value::Leaf(Arc::new(value))
	}

	pub fn is_namespace(&self) -> bool {
		matches!(self, Value::Namespace(_))
	}

	pub fn as_namespace(&self) -> Option<&Arc<Namespace>> {
		match self {
			Value::Namespace(ns) => Some(ns),
			Value::Leaf(_) => None,
		}
	}

	pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
		match self {
			Value::Leaf(leaf) => leaf.clone().downcast::<T>().ok(),
			Value::Namespace(_) => None,
		}
	}
}

impl fmt::Debug for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::Namespace(ns) => write!(f, "Namespace({:?})", ns.id()),
			Value::Leaf(_) => f.write_str("Leaf"),
		}
	}
}

/// What kind of work resolves a deferred binding.
#[derive(Clone, Debug)]
pub(crate) enum DeferredKind {
	/// Load the backing source file and verify it defined the symbol.
	File,
	/// Autovivify a namespace for the backing directory and descend.
	Dir,
	/// Re-resolve the loader-relative symbol path and re-bind the alias site.
	/// Installed by unload when resetting inbound references.
	Alias { cpath: String },
}

/// A deferred binding thunk: enough context to resolve the symbol on first
/// read and to undo the binding at unload time.
pub(crate) struct Deferred {
	pub abspath: PathBuf,
	pub kind: DeferredKind,
	pub loader: Weak<Loader>,
	pub loader_id: LoaderId,
}

/// One-shot gate racing readers wait on while a slot is resolving.
struct Gate {
	done: Mutex<bool>,
	cv: Condvar,
}

impl Gate {
	fn new() -> Self {
		Gate {
			done: Mutex::new(false),
			cv: Condvar::new(),
		}
	}

	fn wait(&self) {
		let mut done = self.done.lock();
		while !*done {
			self.cv.wait(&mut done);
		}
	}

	fn open(&self) {
		let mut done = self.done.lock();
		*done = true;
		self.cv.notify_all();
	}
}

enum Slot {
	Pending(Arc<Deferred>),
	Resolving {
		deferred: Arc<Deferred>,
		gate: Arc<Gate>,
		value: Option<Value>,
		thread: ThreadId,
	},
	Bound(Value),
}

/// Non-resolving view of a slot, used by the scanner to decide between
/// shadowing, promotion, and fresh bindings. A resolving slot still reports
/// its deferred thunk, which covers the window where the backing file is
/// mid-load.
pub(crate) enum Probe {
	Vacant,
	Deferred(Arc<Deferred>),
	Occupied(Value),
}

/// A container of symbols.
///
/// Namespaces are created either as permanently named roots
/// ([`Namespace::root`]) or transient (loader roots and autovivified
/// namespaces). A transient namespace acquires its permanent name the first
/// time it is bound into a permanently named one; the first name wins and
/// propagates down the subtree.
pub struct Namespace {
	id: NsId,
	name: RwLock<Option<String>>,
	entries: Mutex<BTreeMap<String, Slot>>,
	registry: Weak<Registry>,
}

pub(crate) fn name_join(parent: &str, sym: &str) -> String {
	if parent.is_empty() {
		sym.to_string()
	} else {
		format!("{parent}::{sym}")
	}
}

impl Namespace {
	/// Create a permanently named root namespace.
	pub fn root(registry: &Arc<Registry>, name: impl Into<String>) -> Arc<Namespace> {
		Arc::new(Namespace {
			id: NsId::next(),
			name: RwLock::new(Some(name.into())),
			entries: Mutex::new(BTreeMap::new()),
			registry: Arc::downgrade(registry),
		})
	}

	pub(crate) fn transient(registry: Weak<Registry>) -> Arc<Namespace> {
		Arc::new(Namespace {
			id: NsId::next(),
			name: RwLock::new(None),
			entries: Mutex::new(BTreeMap::new()),
			registry,
		})
	}

	pub fn id(&self) -> NsId {
		self.id
	}

	/// The permanent name of this namespace, if it has acquired one.
	pub fn permanent_name(&self) -> Option<String> {
		self.name.read().clone()
	}

	/// Read `sym`, resolving a deferred binding if this is its first read.
	///
	/// Returns `Ok(None)` when the symbol is not defined. A thread that reads
	/// the symbol it is itself currently resolving observes `Ok(None)` rather
	/// than deadlocking.
	pub fn get(self: &Arc<Self>, sym: &str) -> Result<Option<Value>> {
		enum Step {
			Hit(Value),
			Miss,
			Wait(Arc<Gate>),
			Resolve(Arc<Deferred>),
		}

		loop {
			let step = {
				let mut entries = self.entries.lock();
				let decided = match entries.get(sym) {
					None => Step::Miss,
					Some(Slot::Bound(value)) => Step::Hit(value.clone()),
					Some(Slot::Resolving { gate, thread, .. }) => {
						if *thread == std::thread::current().id() {
							Step::Miss
						} else {
							Step::Wait(gate.clone())
						}
					}
					Some(Slot::Pending(deferred)) => Step::Resolve(deferred.clone()),
				};
				if let Step::Resolve(deferred) = &decided {
					entries.insert(
						sym.to_string(),
						Slot::Resolving {
							deferred: deferred.clone(),
							gate: Arc::new(Gate::new()),
							value: None,
							thread: std::thread::current().id(),
						},
					);
				}
				decided
			};

			match step {
				Step::Hit(value) => return Ok(Some(value)),
				Step::Miss => return Ok(None),
				Step::Wait(gate) => gate.wait(),
				Step::Resolve(deferred) => {
					let Some(loader) = deferred.loader.upgrade() else {
						// Owning loader is gone; clear the stale binding.
						self.finish_failure(sym);
						return Ok(None);
					};
					return loader.resolve_deferred(self, sym, &deferred);
				}
			}
		}
	}

	/// Walk a `::`-separated symbol path from this namespace, resolving
	/// deferred bindings along the way. Returns `Ok(None)` when any step is
	/// missing or is not a namespace with further steps remaining.
	pub fn at(self: &Arc<Self>, path: &str) -> Result<Option<Value>> {
		let mut ns = self.clone();
		let mut segments = path.split("::").peekable();
		while let Some(segment) = segments.next() {
			let Some(value) = ns.get(segment)? else {
				return Ok(None);
			};
			if segments.peek().is_none() {
				return Ok(Some(value));
			}
			match value.as_namespace() {
				Some(child) => ns = child.clone(),
				None => return Ok(None),
			}
		}
		Ok(None)
	}

	/// Read `sym` without resolving deferred bindings.
	pub fn peek(&self, sym: &str) -> Option<Value> {
		match self.entries.lock().get(sym) {
			Some(Slot::Bound(value)) => Some(value.clone()),
			_ => None,
		}
	}

	/// Bind `sym` to `value`.
	///
	/// This is the explicit rebind/alias operation: binding a loader-managed
	/// namespace into a permanently named one records the inbound reference
	/// for unload-time reset, assigns permanent names down the subtree, and
	/// keeps explicit-namespace bookkeeping tracking the rename. Bookkeeping
	/// misses are swallowed; the bind itself always takes effect.
	pub fn bind(self: &Arc<Self>, sym: impl Into<String>, value: Value) {
		let sym = sym.into();
		{
			let mut entries = self.entries.lock();
			let resolving = matches!(entries.get(&sym), Some(Slot::Resolving { .. }));
			if resolving {
				if let Some(Slot::Resolving { value: slot, .. }) = entries.get_mut(&sym) {
					*slot = Some(value.clone());
				}
			} else {
				if matches!(entries.get(&sym), Some(Slot::Bound(_))) {
					tracing::warn!(sym = %sym, "symbol already bound, replacing");
				}
				entries.insert(sym.clone(), Slot::Bound(value.clone()));
			}
		}
		self.after_bind(&sym, &value);
	}

	/// Create or reopen a child namespace named `sym`.
	pub fn define_namespace(self: &Arc<Self>, sym: &str) -> Arc<Namespace> {
		{
			let entries = self.entries.lock();
			match entries.get(sym) {
				Some(Slot::Bound(Value::Namespace(ns))) => return ns.clone(),
				Some(Slot::Resolving {
					value: Some(Value::Namespace(ns)),
					..
				}) => return ns.clone(),
				_ => {}
			}
		}
		let ns = Namespace::transient(self.registry.clone());
		self.bind(sym, Value::Namespace(ns.clone()));
		ns
	}

	/// Bind a leaf value, wrapping it for storage.
	pub fn define<T: Any + Send + Sync>(self: &Arc<Self>, sym: &str, value: T) {
		self.bind(sym, Value::leaf(value));
	}

	fn after_bind(self: &Arc<Self>, sym: &str, value: &Value) {
		let Some(parent_name) = self.permanent_name() else {
			return;
		};
		let Value::Namespace(ns) = value else {
			return;
		};
		let cpath = name_join(&parent_name, sym);
		let had_name = ns.permanent_name().is_some();
		ns.assign_names(&cpath);
		if let Some(registry) = self.registry.upgrade() {
			registry.on_permanent_bind(self, sym, ns, had_name, &cpath);
		}
	}

	/// Assign a permanent name to this namespace and, recursively, to every
	/// already-bound child namespace that has none. The first name wins.
	pub(crate) fn assign_names(self: &Arc<Self>, name: &str) {
		{
			let mut slot = self.name.write();
			if slot.is_some() {
				return;
			}
			*slot = Some(name.to_string());
		}
		let children: Vec<(String, Arc<Namespace>)> = {
			let entries = self.entries.lock();
			entries
				.iter()
				.filter_map(|(sym, slot)| match slot {
					Slot::Bound(Value::Namespace(ns)) => Some((sym.clone(), ns.clone())),
					_ => None,
				})
				.collect()
		};
		for (sym, child) in children {
			child.assign_names(&name_join(name, &sym));
		}
	}

	pub(crate) fn probe(&self, sym: &str) -> Probe {
		match self.entries.lock().get(sym) {
			None => Probe::Vacant,
			Some(Slot::Pending(d)) => Probe::Deferred(d.clone()),
			Some(Slot::Resolving { deferred, .. }) => Probe::Deferred(deferred.clone()),
			Some(Slot::Bound(value)) => Probe::Occupied(value.clone()),
		}
	}

	/// Install a deferred binding if the slot is vacant.
	pub(crate) fn install_deferred(&self, sym: &str, deferred: Arc<Deferred>) -> bool {
		let mut entries = self.entries.lock();
		if entries.contains_key(sym) {
			return false;
		}
		entries.insert(sym.to_string(), Slot::Pending(deferred));
		true
	}

	/// Replace `old` (still pending) with `new`. Used by implicit→explicit
	/// promotion to swap a directory thunk for a file thunk.
	pub(crate) fn promote_deferred(&self, sym: &str, old: &Arc<Deferred>, new: Arc<Deferred>) -> bool {
		let mut entries = self.entries.lock();
		let matches = match entries.get(sym) {
			Some(Slot::Pending(current)) => Arc::ptr_eq(current, old),
			_ => false,
		};
		if matches {
			entries.insert(sym.to_string(), Slot::Pending(new));
		}
		matches
	}

	/// Remove a still-pending deferred binding, without side effects. No-op
	/// if the slot resolved or changed in the meantime.
	pub(crate) fn remove_if_deferred(&self, sym: &str, deferred: &Arc<Deferred>) -> bool {
		let mut entries = self.entries.lock();
		let matches = match entries.get(sym) {
			Some(Slot::Pending(current)) => Arc::ptr_eq(current, deferred),
			_ => false,
		};
		if matches {
			entries.remove(sym);
		}
		matches
	}

	/// Remove a bound symbol. Tolerates the symbol being already gone.
	pub(crate) fn remove_bound(&self, sym: &str) -> Option<Value> {
		let mut entries = self.entries.lock();
		if !matches!(entries.get(sym), Some(Slot::Bound(_))) {
			return None;
		}
		match entries.remove(sym) {
			Some(Slot::Bound(value)) => Some(value),
			_ => None,
		}
	}

	/// Replace a bound symbol with an alias-kind deferred binding so that
	/// dereferencing it after reload transparently re-triggers loading.
	pub(crate) fn reset_to_alias(&self, sym: &str, deferred: Arc<Deferred>) {
		let mut entries = self.entries.lock();
		let bound = matches!(entries.get(sym), Some(Slot::Bound(_)));
		if bound {
			entries.insert(sym.to_string(), Slot::Pending(deferred));
		}
	}

	/// Value defined for a resolving slot, if the source has bound it yet.
	pub(crate) fn resolving_value(&self, sym: &str) -> Option<Value> {
		match self.entries.lock().get(sym) {
			Some(Slot::Resolving { value, .. }) => value.clone(),
			_ => None,
		}
	}

	/// Publish a resolving slot: the defined value becomes the binding (or
	/// the slot is removed if nothing was defined) and waiting readers are
	/// released.
	pub(crate) fn finish_bound(&self, sym: &str) -> Option<Value> {
		let mut entries = self.entries.lock();
		let (gate, taken) = match entries.get_mut(sym) {
			Some(Slot::Resolving { gate, value, .. }) => (gate.clone(), value.take()),
			Some(Slot::Bound(value)) => return Some(value.clone()),
			_ => return None,
		};
		let value = match taken {
			Some(value) => {
				entries.insert(sym.to_string(), Slot::Bound(value.clone()));
				Some(value)
			}
			None => {
				entries.remove(sym);
				None
			}
		};
		drop(entries);
		gate.open();
		value
	}

	/// Drop a resolving slot after a failed resolution and release waiters.
	/// The symbol is left undefined so the caller may retry after fixing the
	/// source.
	pub(crate) fn finish_failure(&self, sym: &str) {
		let mut entries = self.entries.lock();
		let gate = match entries.get(sym) {
			Some(Slot::Resolving { gate, .. }) => gate.clone(),
			_ => return,
		};
		entries.remove(sym);
		drop(entries);
		gate.open();
	}
}

impl fmt::Debug for Namespace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Namespace")
			.field("id", &self.id)
			.field("name", &*self.name.read())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::Registry;

	#[test]
	fn bind_and_peek() {
		let registry = Registry::new();
		let root = Namespace::root(&registry, "");
		root.define("Answer", 42u32);
		let value = root.peek("Answer").unwrap();
		assert_eq!(*value.downcast::<u32>().unwrap(), 42);
		assert!(root.peek("Missing").is_none());
	}

	#[test]
	fn define_namespace_reopens() {
		let registry = Registry::new();
		let root = Namespace::root(&registry, "");
		let first = root.define_namespace("Admin");
		let second = root.define_namespace("Admin");
		assert!(Arc::ptr_eq(&first, &second));
	}

	#[test]
	fn at_walks_symbol_paths() {
		let registry = Registry::new();
		let root = Namespace::root(&registry, "");
		let admin = root.define_namespace("Admin");
		admin.define("Role", "superuser");
		let value = root.at("Admin::Role").unwrap().unwrap();
		assert_eq!(*value.downcast::<&str>().unwrap(), "superuser");
		assert!(root.at("Admin::Missing").unwrap().is_none());
		assert!(root.at("Admin::Role::Deeper").unwrap().is_none());
	}

	#[test]
	fn permanent_names_propagate_to_children() {
		let registry = Registry::new();
		let root = Namespace::root(&registry, "");
		let detached = Namespace::transient(Arc::downgrade(&registry));
		let child = detached.define_namespace("Child");
		assert!(detached.permanent_name().is_none());
		assert!(child.permanent_name().is_none());

		root.bind("Attached", Value::Namespace(detached.clone()));
		assert_eq!(detached.permanent_name().as_deref(), Some("Attached"));
		assert_eq!(child.permanent_name().as_deref(), Some("Attached::Child"));

		// First name wins.
		root.bind("Other", Value::Namespace(detached.clone()));
		assert_eq!(detached.permanent_name().as_deref(), Some("Attached"));
	}
}
