//! Model Instances
//!
//! A [`Model`] is a handle to one instance of a [`ModelType`]: the
//! per-instance value store, the original-value snapshot, the dirty
//! tracker, and the nested-binding manager live behind it.
//!
//! # Handles
//!
//! Cloning a `Model` clones the handle, not the instance — both clones
//! read and write the same state, and equality is identity. Nested model
//! values are held by handle too, so an instance can appear as an
//! attribute of several parents at once.
//!
//! # The write path
//!
//! `set` is the heart of the runtime. For a declared attribute it:
//!
//! 1. captures the old value (stored value or resolved preset),
//! 2. short-circuits when the new value equals the old — no events, no
//!    snapshot churn,
//! 3. coerces to the attribute's declared kind,
//! 4. stores the value,
//! 5. swaps nested subscriptions: the old model value is detached, a new
//!    model value is attached,
//! 6. for scalar writes to persistent attributes, maintains the
//!    original-value snapshot (first divergence records the old value;
//!    returning to the snapshot removes the entry) and recomputes the
//!    derived dirty flag,
//! 7. emits a dirty notification if the flag flipped, then the change
//!    notification.
//!
//! Undeclared attributes pass through untouched; writing a computed
//! attribute is ignored.
//!
//! # Dirty tracking
//!
//! `dirty` is derived, never assigned directly:
//! `dirty_count > 0 || !snapshot.is_empty()`. The count tracks dirty
//! nested models on persistent attributes; it moves only when a nested
//! binding consumes a dirty notification from its child.
//!
//! # Locking
//!
//! Instance state sits behind a `parking_lot::RwLock`. No lock is held
//! while listeners run, so a listener may re-enter `set` on this or any
//! other instance. Nested bindings hold weak back-references: a child's
//! emitter never keeps its parent alive.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::event::{ChangeEvent, Emitter, KeyPath, ListenerId, Notification};
use crate::model::schema::{AttrSpec, ModelType};
use crate::model::value::{coerce, ModelError, Value};

/// An active nested-model subscription. At most one exists per attribute,
/// and only while the attribute's current value is that model.
pub(crate) struct NestedHandle {
    pub(crate) child: Model,
    pub(crate) listener: ListenerId,
}

/// Mutable per-instance state.
pub(crate) struct State {
    /// Current attribute values. Attributes that have never been written
    /// are absent; reads fall back to the schema preset.
    pub(crate) values: HashMap<String, Value>,

    /// Original-value snapshot: the pre-divergence value of each currently
    /// dirty persistent attribute.
    pub(crate) orig: HashMap<String, Value>,

    /// Number of currently dirty nested models bound to persistent
    /// attributes.
    pub(crate) dirty_count: i64,

    /// Derived flag; see module docs.
    pub(crate) dirty: bool,

    /// Nested subscriptions, keyed by attribute name.
    pub(crate) handlers: HashMap<String, NestedHandle>,
}

pub(crate) struct Shared {
    pub(crate) state: RwLock<State>,
    pub(crate) emitter: Emitter,
}

/// A handle to a model instance.
pub struct Model {
    ty: Arc<ModelType>,
    pub(crate) shared: Arc<Shared>,
}

/// A non-owning [`Model`] reference, used inside nested-binding closures.
pub struct WeakModel {
    ty: Weak<ModelType>,
    shared: Weak<Shared>,
}

impl WeakModel {
    pub fn upgrade(&self) -> Option<Model> {
        Some(Model {
            ty: self.ty.upgrade()?,
            shared: self.shared.upgrade()?,
        })
    }
}

impl Model {
    /// A fresh instance with no stored values. Instances are created via
    /// `ModelType::create*`, which also fires the construct notification.
    pub(crate) fn empty(ty: Arc<ModelType>) -> Self {
        Self {
            ty,
            shared: Arc::new(Shared {
                state: RwLock::new(State {
                    values: HashMap::new(),
                    orig: HashMap::new(),
                    dirty_count: 0,
                    dirty: false,
                    handlers: HashMap::new(),
                }),
                emitter: Emitter::new(),
            }),
        }
    }

    /// The schema this instance was created from.
    pub fn model_type(&self) -> &Arc<ModelType> {
        &self.ty
    }

    pub fn downgrade(&self) -> WeakModel {
        WeakModel {
            ty: Arc::downgrade(&self.ty),
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Read an attribute.
    ///
    /// Computed attributes invoke their derivation; otherwise the stored
    /// value is returned, falling back to the schema preset (resolving a
    /// thunk preset lazily). Undeclared attributes read as `Null`.
    pub fn get(&self, attr: &str) -> Value {
        match self.ty.spec(attr) {
            Some(spec) => self.get_with(attr, &spec),
            None => Value::Null,
        }
    }

    pub(crate) fn get_with(&self, attr: &str, spec: &AttrSpec) -> Value {
        if let Some(compute) = &spec.compute {
            return compute(self);
        }
        if let Some(value) = self.shared.state.read().values.get(attr) {
            return value.clone();
        }
        match &spec.preset {
            Some(preset) => preset.resolve(),
            None => Value::Null,
        }
    }

    /// Write an attribute with full side effects.
    ///
    /// Returns the value actually stored (after coercion). Coercion
    /// failures propagate; undeclared and computed attributes are no-ops
    /// returning the input unchanged.
    pub fn set(&self, attr: &str, value: impl Into<Value>) -> Result<Value, ModelError> {
        self.set_value(attr, value.into(), false)
    }

    /// Write an attribute without firing notifications or touching the
    /// snapshot. Coercion and nested binding still apply. Used to seed
    /// initial values.
    pub fn set_silent(&self, attr: &str, value: impl Into<Value>) -> Result<Value, ModelError> {
        self.set_value(attr, value.into(), true)
    }

    pub(crate) fn set_value(
        &self,
        attr: &str,
        value: Value,
        silent: bool,
    ) -> Result<Value, ModelError> {
        let Some(spec) = self.ty.spec(attr) else {
            return Ok(value);
        };
        if spec.compute.is_some() {
            return Ok(value);
        }
        let old = self.get_with(attr, &spec);
        if value == old {
            return Ok(value);
        }
        // The equality check deliberately precedes coercion: a raw value
        // that only becomes equal after conversion still counts as a
        // write.
        let value = match &spec.coerce {
            Some(kind) if !value.is_null() => coerce(kind, value)?,
            _ => value,
        };
        Ok(self.apply(attr, &spec, value, old, silent))
    }

    /// The post-coercion write path: store, rebind, snapshot, emit.
    ///
    /// `value` must already satisfy the attribute's declared kind and
    /// differ from `old`. Restoration during reset enters here directly,
    /// since snapshot values were coerced when first stored.
    pub(crate) fn apply(
        &self,
        attr: &str,
        spec: &AttrSpec,
        value: Value,
        old: Value,
        silent: bool,
    ) -> Value {
        trace!(
            model = self.ty.name(),
            attr,
            new = value.type_name(),
            old = old.type_name(),
            silent,
            "write"
        );

        let mut pending: SmallVec<[Notification; 2]> = SmallVec::new();

        let detached = {
            let mut state = self.shared.state.write();
            state.values.insert(attr.to_owned(), value.clone());
            if matches!(old, Value::Model(_)) {
                state.handlers.remove(attr)
            } else {
                None
            }
        };
        if let Some(handle) = detached {
            handle.child.shared.emitter.off(handle.listener);
            debug!(model = self.ty.name(), attr, "detached nested model");
        }

        if let Value::Model(child) = &value {
            // A model-valued attribute never enters the snapshot: its own
            // dirty state arrives through the binding instead.
            self.attach(child, attr);
        } else if !silent && spec.persistent {
            let mut state = self.shared.state.write();
            if !state.orig.contains_key(attr) {
                state.orig.insert(attr.to_owned(), old.clone());
            } else if state.orig.get(attr) == Some(&value) {
                // Back to the original: the transient edit collapses.
                state.orig.remove(attr);
            }
            if let Some(flip) = Self::recompute_dirty(&mut state) {
                pending.push(flip);
            }
        }

        if !silent {
            pending.push(Notification::Change(ChangeEvent {
                path: KeyPath::from_key(attr),
                value: value.clone(),
                old,
            }));
        }
        for notification in &pending {
            self.shared.emitter.emit(notification);
        }
        value
    }

    /// Subscribe this instance to a nested model's notifications and
    /// record the handle for later detachment.
    fn attach(&self, child: &Model, attr: &str) {
        let parent = self.downgrade();
        let attr_name: Arc<str> = Arc::from(attr);
        let listener = child.shared.emitter.on(move |notification| {
            if let Some(parent) = parent.upgrade() {
                parent.forward_nested(&attr_name, notification);
            }
        });
        self.shared.state.write().handlers.insert(
            attr.to_owned(),
            NestedHandle {
                child: child.clone(),
                listener,
            },
        );
        debug!(model = self.ty.name(), attr, "attached nested model");
    }

    /// Handle a notification from a nested model bound at `attr`.
    ///
    /// Dirty transitions are consumed: they adjust the dirty counter (for
    /// persistent attributes) and are never re-emitted. Changes are
    /// re-emitted with `attr` prepended to the path, which is what builds
    /// arbitrarily deep keypaths as models nest.
    fn forward_nested(&self, attr: &str, notification: &Notification) {
        match notification {
            Notification::Dirty { dirty } => {
                let persistent = self.ty.spec(attr).is_some_and(|spec| spec.persistent);
                if persistent {
                    self.adjust_dirty_count(if *dirty { 1 } else { -1 });
                }
            }
            Notification::Change(event) => {
                self.shared
                    .emitter
                    .emit(&Notification::Change(ChangeEvent {
                        path: event.path.prefixed(attr),
                        value: event.value.clone(),
                        old: event.old.clone(),
                    }));
            }
            Notification::Construct(_) => {}
        }
    }

    pub(crate) fn adjust_dirty_count(&self, delta: i64) {
        let flip = {
            let mut state = self.shared.state.write();
            state.dirty_count += delta;
            Self::recompute_dirty(&mut state)
        };
        if let Some(notification) = flip {
            self.shared.emitter.emit(&notification);
        }
    }

    /// Re-derive the dirty flag; returns the notification to emit if it
    /// flipped. Callers emit after releasing the state lock.
    pub(crate) fn recompute_dirty(state: &mut State) -> Option<Notification> {
        let dirty = state.dirty_count > 0 || !state.orig.is_empty();
        if dirty != state.dirty {
            state.dirty = dirty;
            Some(Notification::Dirty { dirty })
        } else {
            None
        }
    }

    /// The derived dirty flag.
    pub fn is_dirty(&self) -> bool {
        self.shared.state.read().dirty
    }

    /// The snapshot entry for `attr`, if the attribute has diverged from
    /// its baseline.
    pub fn original(&self, attr: &str) -> Option<Value> {
        self.shared.state.read().orig.get(attr).cloned()
    }

    pub(crate) fn snapshot_contains(&self, attr: &str) -> bool {
        self.shared.state.read().orig.contains_key(attr)
    }

    // ------------------------------------------------------------------
    // Subscription surface
    // ------------------------------------------------------------------

    /// Subscribe to every notification this instance emits.
    pub fn observe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.shared.emitter.on(callback)
    }

    /// Subscribe to all change notifications, direct and nested.
    pub fn on_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.shared.emitter.on(move |notification| {
            if let Notification::Change(event) = notification {
                callback(event);
            }
        })
    }

    /// Subscribe to changes at exactly `path`.
    pub fn on_change_at<F>(&self, path: KeyPath, callback: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.shared.emitter.on_filtered(
            crate::event::Filter::Exact(path),
            move |notification| {
                if let Notification::Change(event) = notification {
                    callback(event);
                }
            },
        )
    }

    /// Subscribe to changes at or under `path`.
    pub fn on_change_within<F>(&self, path: KeyPath, callback: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.shared.emitter.on_filtered(
            crate::event::Filter::Prefix(path),
            move |notification| {
                if let Notification::Change(event) = notification {
                    callback(event);
                }
            },
        )
    }

    /// Subscribe to dirty-flag transitions.
    pub fn on_dirty<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.shared.emitter.on(move |notification| {
            if let Notification::Dirty { dirty } = notification {
                callback(*dirty);
            }
        })
    }

    /// Detach a listener registered on this instance.
    pub fn unobserve(&self, id: ListenerId) -> bool {
        self.shared.emitter.off(id)
    }
}

impl Clone for Model {
    fn clone(&self) -> Self {
        Self {
            ty: Arc::clone(&self.ty),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Model {}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("Model")
            .field("type", &self.ty.name())
            .field("dirty", &state.dirty)
            .field("values", &state.values.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema::{model, AttrSpec};
    use crate::model::value::Kind;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn recorded(model: &Model) -> Arc<Mutex<Vec<Notification>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        model.observe(move |notification| {
            events_clone.lock().push(notification.clone());
        });
        events
    }

    #[test]
    fn set_stores_and_get_reads() {
        let ty = model("Thing").attr("name", "");
        let thing = ty.create();

        assert_eq!(thing.get("name"), Value::from(""));
        thing.set("name", "first").unwrap();
        assert_eq!(thing.get("name"), Value::from("first"));
    }

    #[test]
    fn undeclared_attributes_are_ignored() {
        let ty = model("Thing").attr("name", "");
        let thing = ty.create();
        let events = recorded(&thing);

        let returned = thing.set("missing", 5).unwrap();
        assert_eq!(returned, Value::Int(5));
        assert_eq!(thing.get("missing"), Value::Null);
        assert!(events.lock().is_empty());
        assert!(!thing.is_dirty());
    }

    #[test]
    fn equal_writes_are_no_ops() {
        let ty = model("Thing").attr("name", "");
        let thing = ty.create();
        thing.set("name", "same").unwrap();

        let events = recorded(&thing);
        thing.set("name", "same").unwrap();

        assert!(events.lock().is_empty());
        assert!(thing.original("name").is_some());
    }

    #[test]
    fn set_emits_dirty_then_change() {
        let ty = model("Thing").attr("name", "");
        let thing = ty.create();
        let events = recorded(&thing);

        thing.set("name", "first").unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Notification::Dirty { dirty: true }));
        let change = events[1].as_change().unwrap();
        assert_eq!(change.path.to_string(), "name");
        assert_eq!(change.value, Value::from("first"));
        assert_eq!(change.old, Value::from(""));
    }

    #[test]
    fn second_write_does_not_repeat_dirty() {
        let ty = model("Thing").attr("name", "");
        let thing = ty.create();
        thing.set("name", "first").unwrap();

        let events = recorded(&thing);
        thing.set("name", "second").unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(events[0].as_change().is_some());
    }

    #[test]
    fn silent_writes_emit_nothing_and_stay_clean() {
        let ty = model("Thing").attr("name", "");
        let thing = ty.create();
        let events = recorded(&thing);

        thing.set_silent("name", "seeded").unwrap();

        assert!(events.lock().is_empty());
        assert_eq!(thing.get("name"), Value::from("seeded"));
        assert!(!thing.is_dirty());
        assert!(thing.original("name").is_none());
    }

    #[test]
    fn dirty_round_trip_restores_clean() {
        let ty = model("Thing").attr("name", "original");
        let thing = ty.create();

        thing.set("name", "edited").unwrap();
        assert!(thing.is_dirty());
        assert_eq!(thing.original("name"), Some(Value::from("original")));

        thing.set("name", "original").unwrap();
        assert!(!thing.is_dirty());
        assert!(thing.original("name").is_none());
    }

    #[test]
    fn non_persistent_attributes_do_not_dirty() {
        let ty = model("Thing").attr("state", AttrSpec::new().preset("idle").persistent(false));
        let thing = ty.create();

        thing.set("state", "busy").unwrap();
        assert!(!thing.is_dirty());
        assert!(thing.original("state").is_none());
    }

    #[test]
    fn coercion_applies_on_write() {
        let ty = model("Thing").attr("count", Kind::Number);
        let thing = ty.create();

        let stored = thing.set("count", "41").unwrap();
        assert_eq!(stored, Value::Int(41));
        assert_eq!(thing.get("count"), Value::Int(41));

        assert!(thing.set("count", "not a number").is_err());
        // Failed coercion leaves the store untouched.
        assert_eq!(thing.get("count"), Value::Int(41));
    }

    #[test]
    fn null_skips_coercion() {
        let ty = model("Thing").attr("count", Kind::Number);
        let thing = ty.create();
        thing.set("count", 5).unwrap();

        thing.set("count", Value::Null).unwrap();
        assert_eq!(thing.get("count"), Value::Null);
    }

    #[test]
    fn computed_attributes_read_through_and_ignore_writes() {
        let ty = model("Thing")
            .attr("first", "Ada")
            .attr("last", "Lovelace")
            .attr(
                "full",
                AttrSpec::new().computed(|instance| {
                    let first = instance.get("first");
                    let last = instance.get("last");
                    Value::Text(format!(
                        "{} {}",
                        first.as_str().unwrap_or(""),
                        last.as_str().unwrap_or("")
                    ))
                }),
            );
        let thing = ty.create();

        assert_eq!(thing.get("full"), Value::from("Ada Lovelace"));
        thing.set("full", "ignored").unwrap();
        assert_eq!(thing.get("full"), Value::from("Ada Lovelace"));
        assert!(!thing.is_dirty());
    }

    #[test]
    fn nested_changes_propagate_with_keypaths() {
        let address = model("Address").attr("name", "").attr("street", "");
        let user = model("User").attr("name", "").attr("address", &address);

        let u = user
            .create_from_json(serde_json::json!({
                "name": "A",
                "address": { "name": "B", "street": "S" }
            }))
            .unwrap();
        let events = recorded(&u);

        let addr = u.get("address");
        let addr = addr.as_model().unwrap();
        addr.set("name", "C").unwrap();

        let events = events.lock();
        // Parent sees its own dirty flip (consumed from the child's dirty
        // notification) plus the re-emitted change.
        let changes: Vec<_> = events
            .iter()
            .filter_map(Notification::as_change)
            .collect();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path.to_string(), "address.name");
        assert_eq!(changes[0].value, Value::from("C"));
        assert_eq!(changes[0].old, Value::from("B"));
        assert!(u.is_dirty());
    }

    #[test]
    fn nested_dirty_is_consumed_not_forwarded() {
        let address = model("Address").attr("name", "");
        let user = model("User").attr("address", &address);

        let u = user
            .create_from_json(serde_json::json!({ "address": { "name": "B" } }))
            .unwrap();
        let events = recorded(&u);

        let addr = u.get("address");
        addr.as_model().unwrap().set("name", "C").unwrap();

        let events = events.lock();
        let dirty_paths: Vec<String> = events
            .iter()
            .filter_map(Notification::as_change)
            .map(|change| change.path.to_string())
            .collect();
        assert_eq!(dirty_paths, vec!["address.name".to_owned()]);
        assert!(events
            .iter()
            .any(|n| matches!(n, Notification::Dirty { dirty: true })));
    }

    #[test]
    fn non_persistent_nested_models_do_not_dirty_the_parent() {
        let address = model("Address").attr("name", "");
        let user = model("User").attr(
            "scratch",
            AttrSpec::from(&address).persistent(false),
        );

        let u = user.create();
        u.set("scratch", address.create()).unwrap();

        let scratch = u.get("scratch");
        scratch.as_model().unwrap().set("name", "X").unwrap();
        assert!(!u.is_dirty());
    }

    #[test]
    fn replacing_a_nested_model_detaches_the_old_one() {
        let address = model("Address").attr("name", "");
        let user = model("User").attr("address", &address);

        let u = user.create();
        let first = address.create();
        let second = address.create();

        u.set("address", &first).unwrap();
        u.set("address", &second).unwrap();

        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        u.on_change(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        // The stale child no longer reaches the parent.
        first.set("name", "stale").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!u.is_dirty());

        second.set("name", "live").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(u.is_dirty());
    }

    #[test]
    fn deep_nesting_builds_full_keypaths() {
        let c = model("C").attr("leaf", "");
        let b = model("B").attr("c", &c);
        let a = model("A").attr("b", &b);

        let root = a
            .create_from_json(serde_json::json!({ "b": { "c": { "leaf": "x" } } }))
            .unwrap();
        let paths = Arc::new(Mutex::new(Vec::new()));
        let paths_clone = paths.clone();
        root.on_change(move |event| {
            paths_clone.lock().push(event.path.to_string());
        });

        let leaf_owner = root.get("b");
        let leaf_owner = leaf_owner.as_model().unwrap().get("c");
        leaf_owner.as_model().unwrap().set("leaf", "y").unwrap();

        assert_eq!(*paths.lock(), vec!["b.c.leaf".to_owned()]);
        assert!(root.is_dirty());
    }

    #[test]
    fn reentrant_set_from_a_listener() {
        let ty = model("Thing").attr("a", 0).attr("b", 0);
        let thing = ty.create();

        let reentrant = thing.clone();
        thing.on_change_at(KeyPath::from_key("a"), move |event| {
            // Mirror writes of `a` into `b` from inside the listener.
            let _ = reentrant.set("b", event.value.clone());
        });

        thing.set("a", 7).unwrap();
        assert_eq!(thing.get("a"), Value::Int(7));
        assert_eq!(thing.get("b"), Value::Int(7));
    }

    #[test]
    fn exact_path_listeners_receive_payloads() {
        let ty = model("Thing").attr("name", "");
        let thing = ty.create();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        thing.on_change_at(KeyPath::from_key("name"), move |event| {
            seen_clone.lock().push((event.value.clone(), event.old.clone()));
        });

        thing.set("name", "x").unwrap();
        assert_eq!(
            *seen.lock(),
            vec![(Value::from("x"), Value::from(""))]
        );
    }

    #[test]
    fn handle_clones_share_state() {
        let ty = model("Thing").attr("name", "");
        let a = ty.create();
        let b = a.clone();

        a.set("name", "shared").unwrap();
        assert_eq!(b.get("name"), Value::from("shared"));
        assert_eq!(a, b);
        assert_ne!(a, ty.create());
    }

    #[test]
    fn dropped_parent_makes_the_binding_a_no_op() {
        let address = model("Address").attr("name", "");
        let user = model("User").attr("address", &address);

        let child = address.create();
        {
            let parent = user.create();
            parent.set("address", &child).unwrap();
        }
        // Parent is gone; the child still has a listener, which must do
        // nothing when fired.
        child.set("name", "orphan").unwrap();
        assert!(child.is_dirty());
    }
}
