//! Lifecycle Operations
//!
//! Compound operations over the value store, the snapshot, the dirty
//! tracker, and the nested bindings: reset to baseline, re-baseline,
//! keypath dirty queries, bulk update, duplication, and serialization.

use serde::ser::{Serialize, Serializer};
use tracing::debug;

use crate::event::Segment;
use crate::model::instance::Model;
use crate::model::value::{json_type_name, ModelError, Value};

impl Model {
    /// Restore every diverged attribute to its snapshot value and
    /// recursively reset nested models. A clean instance is a no-op.
    ///
    /// Restoration routes through the normal write path, so each restored
    /// attribute clears its own snapshot entry, recomputes the dirty flag,
    /// and emits its change notification.
    pub fn reset(&self) {
        if !self.is_dirty() {
            return;
        }
        for name in self.model_type().attr_names() {
            self.reset_attr(&name);
        }
    }

    /// Restore a single attribute, leaving the rest of the instance's
    /// dirty state untouched. A nested model value is reset recursively;
    /// an attribute without a snapshot entry is a no-op.
    pub fn reset_attr(&self, attr: &str) {
        let Some(spec) = self.model_type().spec(attr) else {
            return;
        };
        let current = self.get_with(attr, &spec);
        if let Value::Model(child) = current {
            child.reset();
            return;
        }
        let original = self.shared.state.read().orig.get(attr).cloned();
        if let Some(original) = original {
            if original != current {
                // Snapshot values were coerced when first stored, so the
                // restore enters the post-coercion path directly.
                self.apply(attr, &spec, original, current, false);
            }
        }
    }

    /// Establish a new baseline: every currently held value becomes clean.
    ///
    /// Clears the snapshot, re-baselines nested models recursively, then
    /// zeroes the nested dirty counter. Children are recursed before the
    /// counter is zeroed — each child going clean decrements the counter
    /// through its binding, and zeroing first would drive it negative.
    pub fn reset_dirty(&self) {
        debug!(model = self.model_type().name(), "reset baseline");
        let children: Vec<Model> = {
            let mut state = self.shared.state.write();
            state.orig.clear();
            state
                .values
                .values()
                .filter_map(|value| value.as_model().cloned())
                .collect()
        };
        for child in children {
            child.reset_dirty();
        }
        let flip = {
            let mut state = self.shared.state.write();
            state.dirty_count = 0;
            Self::recompute_dirty(&mut state)
        };
        if let Some(notification) = flip {
            self.shared.emitter.emit(&notification);
        }
    }

    /// Is the attribute at `path` dirty?
    ///
    /// The path resolves through nested models, maps, and lists
    /// (`"address.name"`, `"items.0.name"`). A model target answers with
    /// its own dirty flag; a leaf falls back to snapshot membership in the
    /// model owning it. Paths that cannot be resolved — including
    /// unparseable ones — are not dirty.
    pub fn is_dirty_at(&self, path: &str) -> bool {
        let Ok(path) = path.parse::<crate::event::KeyPath>() else {
            return false;
        };
        if path.is_empty() {
            return self.is_dirty();
        }
        if let Some(Value::Model(target)) = self.resolve(path.segments()) {
            return target.is_dirty();
        }
        if let [Segment::Key(name)] = path.segments() {
            return self.snapshot_contains(name);
        }
        let Some((leaf, parent)) = path.split_last() else {
            return false;
        };
        match (self.resolve(parent), leaf) {
            (Some(Value::Model(owner)), Segment::Key(name)) => owner.is_dirty_at(name),
            _ => false,
        }
    }

    /// Walk a path from this instance, through models, maps, and lists.
    fn resolve(&self, segments: &[Segment]) -> Option<Value> {
        let mut iter = segments.iter();
        let mut current = match iter.next()? {
            Segment::Key(name) => {
                if !self.model_type().has_attr(name) {
                    return None;
                }
                self.get(name)
            }
            Segment::Index(_) => return None,
        };
        for segment in iter {
            current = match (current, segment) {
                (Value::Model(owner), Segment::Key(name)) => {
                    if !owner.model_type().has_attr(name) {
                        return None;
                    }
                    owner.get(name)
                }
                (Value::Map(map), Segment::Key(name)) => map.get(name)?.clone(),
                (Value::List(items), Segment::Index(index)) => items.get(*index)?.clone(),
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set every declared attribute present in `values`, with full side
    /// effects. Unknown keys are ignored; the first coercion failure
    /// aborts and propagates.
    pub fn update<K, V, I>(&self, values: I) -> Result<(), ModelError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (key, value) in values {
            let key = key.as_ref();
            if self.model_type().has_attr(key) {
                self.set(key, value)?;
            }
        }
        Ok(())
    }

    /// [`update`](Self::update) from a JSON object.
    pub fn update_json(&self, json: serde_json::Value) -> Result<(), ModelError> {
        match json {
            serde_json::Value::Object(map) => {
                self.update(map.into_iter().map(|(key, value)| (key, Value::from(value))))
            }
            other => Err(ModelError::ExpectedObject(json_type_name(&other))),
        }
    }

    /// A new instance of the same type seeded with this instance's full
    /// serialized state, nested models included.
    ///
    /// Seeding uses initial-value semantics, so the duplicate starts with
    /// a fresh baseline and `is_dirty() == false` regardless of this
    /// instance's state. (Handle [`Clone`] shares state instead; this is
    /// the deep copy.)
    pub fn duplicate(&self) -> Result<Model, ModelError> {
        self.model_type().create_from_json(self.to_json(true))
    }

    /// Serialize to a JSON object in schema registration order.
    ///
    /// Non-persistent attributes are skipped unless
    /// `include_non_persistent` is set. Nested models serialize
    /// recursively with the same flag.
    pub fn to_json(&self, include_non_persistent: bool) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, spec) in self.model_type().attrs() {
            if !spec.is_persistent() && !include_non_persistent {
                continue;
            }
            let value = self.get_with(&name, &spec);
            map.insert(name, value_to_json(&value, include_non_persistent));
        }
        serde_json::Value::Object(map)
    }
}

/// Convert a stored value to JSON, serializing nested models recursively.
pub(crate) fn value_to_json(value: &Value, include_non_persistent: bool) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::from(*n),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| value_to_json(item, include_non_persistent))
                .collect(),
        ),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), value_to_json(item, include_non_persistent)))
                .collect(),
        ),
        Value::Model(nested) => nested.to_json(include_non_persistent),
    }
}

/// The persistent view, matching `to_json(false)`.
impl Serialize for Model {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json(false).serialize(serializer)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
