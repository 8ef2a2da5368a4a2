//! Schema Registry
//!
//! A [`ModelType`] is the shared, schema-level half of a model: an ordered
//! table of attribute declarations plus a construct-event emitter. All
//! instances of a kind hold the same `Arc<ModelType>`.
//!
//! Attributes are declared with the chainable [`ModelType::attr`]. The
//! declaration accepts shorthand forms, normalized into a canonical
//! [`AttrSpec`]:
//!
//! - a bare scalar becomes the preset value,
//! - a [`Kind`] (or a nested model type) becomes the coercion target,
//! - a full `AttrSpec` passes through unchanged.
//!
//! Registration order is preserved and determines default serialization
//! order. Re-registering a name replaces the earlier declaration.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::event::{Emitter, ListenerId, Notification};
use crate::model::instance::Model;
use crate::model::value::{json_type_name, Kind, ModelError, Value};

/// A derivation function for a computed attribute.
pub type ComputeFn = Arc<dyn Fn(&Model) -> Value + Send + Sync>;

/// A lazily evaluated default value.
pub type PresetFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// An attribute's default: a plain value, or a thunk resolved at read time
/// when the store holds no entry.
#[derive(Clone)]
pub enum Preset {
    Value(Value),
    Thunk(PresetFn),
}

impl Preset {
    pub fn resolve(&self) -> Value {
        match self {
            Preset::Value(value) => value.clone(),
            Preset::Thunk(thunk) => thunk(),
        }
    }
}

/// A declared attribute.
///
/// `persistent` attributes participate in dirty tracking and default
/// serialization; it defaults to true. A `compute` function makes the
/// attribute read-only and derived: reads bypass the value store entirely
/// and writes are ignored.
#[derive(Clone)]
pub struct AttrSpec {
    pub(crate) preset: Option<Preset>,
    pub(crate) persistent: bool,
    pub(crate) coerce: Option<Kind>,
    pub(crate) compute: Option<ComputeFn>,
}

impl AttrSpec {
    pub fn new() -> Self {
        Self {
            preset: None,
            persistent: true,
            coerce: None,
            compute: None,
        }
    }

    pub fn preset(mut self, value: impl Into<Value>) -> Self {
        self.preset = Some(Preset::Value(value.into()));
        self
    }

    /// A preset resolved lazily on each defaulted read.
    pub fn preset_with<F>(mut self, thunk: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.preset = Some(Preset::Thunk(Arc::new(thunk)));
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn coerce(mut self, kind: Kind) -> Self {
        self.coerce = Some(kind);
        self
    }

    /// Make the attribute computed (read-only, derived).
    pub fn computed<F>(mut self, compute: F) -> Self
    where
        F: Fn(&Model) -> Value + Send + Sync + 'static,
    {
        self.compute = Some(Arc::new(compute));
        self
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }
}

// A derived Default would leave `persistent` false.
impl Default for AttrSpec {
    fn default() -> Self {
        Self::new()
    }
}

impl From<()> for AttrSpec {
    fn from(_: ()) -> Self {
        AttrSpec::new()
    }
}

impl From<Kind> for AttrSpec {
    fn from(kind: Kind) -> Self {
        AttrSpec::new().coerce(kind)
    }
}

impl From<&Arc<ModelType>> for AttrSpec {
    fn from(ty: &Arc<ModelType>) -> Self {
        AttrSpec::new().coerce(Kind::Model(Arc::clone(ty)))
    }
}

impl From<Arc<ModelType>> for AttrSpec {
    fn from(ty: Arc<ModelType>) -> Self {
        AttrSpec::new().coerce(Kind::Model(ty))
    }
}

macro_rules! preset_shorthand {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for AttrSpec {
                fn from(value: $ty) -> Self {
                    AttrSpec::new().preset(value)
                }
            }
        )*
    };
}

preset_shorthand!(Value, bool, i32, i64, f64, &str, String);

/// A named model type: the schema shared by all of its instances.
pub struct ModelType {
    name: String,
    attrs: RwLock<IndexMap<String, AttrSpec>>,
    emitter: Emitter,
}

/// Create a new, empty model type.
///
/// Returned as `Arc` so declarations chain and instances can share it:
///
/// ```
/// use trellis_core::model::model;
///
/// let address = model("Address").attr("name", "").attr("street", "");
/// let user = model("User").attr("name", "").attr("address", &address);
/// ```
pub fn model(name: impl Into<String>) -> Arc<ModelType> {
    Arc::new(ModelType {
        name: name.into(),
        attrs: RwLock::new(IndexMap::new()),
        emitter: Emitter::new(),
    })
}

impl ModelType {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare (or replace) an attribute. Chainable.
    pub fn attr(self: &Arc<Self>, name: impl Into<String>, spec: impl Into<AttrSpec>) -> Arc<Self> {
        self.attrs.write().insert(name.into(), spec.into());
        Arc::clone(self)
    }

    /// Apply a plugin: a function that extends this type's schema.
    /// Chainable.
    pub fn use_plugin(self: &Arc<Self>, plugin: impl FnOnce(&Arc<Self>)) -> Arc<Self> {
        plugin(self);
        Arc::clone(self)
    }

    /// Look up a declared attribute.
    pub fn spec(&self, name: &str) -> Option<AttrSpec> {
        self.attrs.read().get(name).cloned()
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.read().contains_key(name)
    }

    /// Declared attribute names, in registration order.
    pub fn attr_names(&self) -> Vec<String> {
        self.attrs.read().keys().cloned().collect()
    }

    /// A snapshot of the attribute table, in registration order.
    pub fn attrs(&self) -> Vec<(String, AttrSpec)> {
        self.attrs
            .read()
            .iter()
            .map(|(name, spec)| (name.clone(), spec.clone()))
            .collect()
    }

    /// Subscribe to construct notifications, fired once per instantiation
    /// with the new instance.
    pub fn on_construct<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Model) + Send + Sync + 'static,
    {
        self.emitter.on(move |notification| {
            if let Notification::Construct(instance) = notification {
                callback(instance);
            }
        })
    }

    /// Detach a construct listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.emitter.off(id)
    }

    /// Construct an instance with no initial values.
    pub fn create(self: &Arc<Self>) -> Model {
        let instance = Model::empty(Arc::clone(self));
        self.emitter.emit(&Notification::Construct(instance.clone()));
        instance
    }

    /// Construct an instance seeded with initial values.
    ///
    /// Seeding goes through silent sets: coercion and nested binding apply,
    /// but no change or dirty notifications fire and no snapshot entries
    /// are recorded — the instance starts clean. Keys not present in the
    /// schema are ignored. The construct notification fires after seeding.
    pub fn create_from(
        self: &Arc<Self>,
        values: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<Model, ModelError> {
        let instance = Model::empty(Arc::clone(self));
        for (key, value) in values {
            instance.set_value(&key, value, true)?;
        }
        self.emitter.emit(&Notification::Construct(instance.clone()));
        Ok(instance)
    }

    /// Construct an instance from a JSON object.
    pub fn create_from_json(self: &Arc<Self>, json: serde_json::Value) -> Result<Model, ModelError> {
        match json {
            serde_json::Value::Object(map) => self.create_from(
                map.into_iter().map(|(key, value)| (key, Value::from(value))),
            ),
            other => Err(ModelError::ExpectedObject(json_type_name(&other))),
        }
    }
}

impl std::fmt::Debug for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelType")
            .field("name", &self.name)
            .field("attrs", &self.attr_names())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
