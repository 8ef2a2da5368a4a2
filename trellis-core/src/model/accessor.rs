//! Attribute Accessors
//!
//! An [`Accessor`] is a bound (instance, attribute) pair vended from the
//! schema table: the table-dispatched replacement for per-attribute
//! property generation. Reads and writes delegate to the instance's
//! normal get/set path.

use crate::event::KeyPath;
use crate::model::instance::Model;
use crate::model::value::{ModelError, Value};

/// A read/write handle for one declared attribute of one instance.
#[derive(Debug, Clone)]
pub struct Accessor {
    model: Model,
    name: String,
}

impl Accessor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> Value {
        self.model.get(&self.name)
    }

    pub fn set(&self, value: impl Into<Value>) -> Result<Value, ModelError> {
        self.model.set(&self.name, value)
    }

    pub fn is_dirty(&self) -> bool {
        self.model.is_dirty_at(&self.name)
    }

    pub fn reset(&self) {
        self.model.reset_attr(&self.name);
    }

    /// The single-key path of this attribute.
    pub fn path(&self) -> KeyPath {
        KeyPath::from_key(self.name.clone())
    }
}

impl Model {
    /// An accessor for a declared attribute, or `None` if the schema has
    /// no such entry.
    pub fn accessor(&self, name: &str) -> Option<Accessor> {
        self.model_type().has_attr(name).then(|| Accessor {
            model: self.clone(),
            name: name.to_owned(),
        })
    }

    /// One accessor per declared attribute, in registration order.
    pub fn accessors(&self) -> Vec<Accessor> {
        self.model_type()
            .attr_names()
            .into_iter()
            .map(|name| Accessor {
                model: self.clone(),
                name,
            })
            .collect()
    }
}
