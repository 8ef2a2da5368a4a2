//! Attribute Values
//!
//! Every attribute of a model instance holds a [`Value`]. Scalars and
//! containers are owned data; the `Model` variant shares ownership of a
//! nested instance with everyone else holding its handle.
//!
//! # Equality
//!
//! Scalars and containers compare structurally; models compare by
//! identity. This is the comparison the write path's equality
//! short-circuit uses: assigning the same model handle (or an equal
//! scalar) to an attribute is a no-op.
//!
//! # Coercion
//!
//! An attribute may declare a target [`Kind`]. Incoming values that are
//! not already of that kind are converted by a closed set of rules (see
//! [`coerce`]); anything outside the table is a [`ModelError::Coerce`]
//! that propagates to the caller unchanged.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::model::instance::Model;
use crate::model::schema::ModelType;

/// A value stored in (or assignable to) a model attribute.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),

    /// A nested model instance. Held by handle; binding it to an attribute
    /// subscribes the owner to its change notifications.
    Model(Model),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// A short name for error messages and logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Model(_) => "model",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_model(&self) -> Option<&Model> {
        match self {
            Value::Model(model) => Some(model),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            // Identity, not structure: two distinct instances with equal
            // attributes are still different values.
            (Value::Model(a), Value::Model(b)) => a == b,
            _ => false,
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<Model> for Value {
    fn from(model: Model) -> Self {
        Value::Model(model)
    }
}

impl From<&Model> for Value {
    fn from(model: &Model) -> Self {
        Value::Model(model.clone())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

/// The target of an attribute's type coercion.
#[derive(Clone)]
pub enum Kind {
    /// `i64` or `f64`; textual input parses as an integer first.
    Number,
    Bool,
    Text,

    /// A nested model type: maps construct new instances, same-type models
    /// pass through untouched.
    Model(Arc<ModelType>),
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Number => f.write_str("number"),
            Kind::Bool => f.write_str("bool"),
            Kind::Text => f.write_str("text"),
            Kind::Model(ty) => write!(f, "model {}", ty.name()),
        }
    }
}

impl fmt::Debug for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kind({self})")
    }
}

/// Errors surfaced by the model runtime.
///
/// There is deliberately no larger taxonomy: caller mistakes that cannot
/// corrupt state (unknown attributes, unresolvable dirty paths) are silent
/// no-ops, not errors.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A value could not be converted to an attribute's declared kind.
    #[error("cannot coerce {found} value into {expected}")]
    Coerce {
        expected: String,
        found: &'static str,
    },

    /// Initial values or an update payload was not a JSON object.
    #[error("expected a JSON object, found {0}")]
    ExpectedObject(&'static str),
}

fn mismatch(kind: &Kind, value: &Value) -> ModelError {
    ModelError::Coerce {
        expected: kind.to_string(),
        found: value.type_name(),
    }
}

/// Convert `value` to `kind`.
///
/// Values already of the target kind pass through unchanged; everything
/// else follows a closed rule table. `Null` never reaches this function —
/// the write path stores it uncoerced.
pub fn coerce(kind: &Kind, value: Value) -> Result<Value, ModelError> {
    match kind {
        Kind::Number => match value {
            Value::Int(_) | Value::Float(_) => Ok(value),
            Value::Bool(b) => Ok(Value::Int(b as i64)),
            Value::Text(ref s) => {
                if let Ok(i) = s.parse::<i64>() {
                    Ok(Value::Int(i))
                } else if let Ok(f) = s.parse::<f64>() {
                    Ok(Value::Float(f))
                } else {
                    Err(mismatch(kind, &value))
                }
            }
            other => Err(mismatch(kind, &other)),
        },
        Kind::Bool => match value {
            Value::Bool(_) => Ok(value),
            Value::Int(n) => Ok(Value::Bool(n != 0)),
            Value::Float(f) => Ok(Value::Bool(f != 0.0)),
            // Strict spelling, not truthiness.
            Value::Text(ref s) => match s.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch(kind, &value)),
            },
            other => Err(mismatch(kind, &other)),
        },
        Kind::Text => match value {
            Value::Text(_) => Ok(value),
            Value::Int(n) => Ok(Value::Text(n.to_string())),
            Value::Float(f) => Ok(Value::Text(f.to_string())),
            Value::Bool(b) => Ok(Value::Text(b.to_string())),
            other => Err(mismatch(kind, &other)),
        },
        Kind::Model(ty) => match value {
            Value::Model(model) if Arc::ptr_eq(model.model_type(), ty) => Ok(Value::Model(model)),
            // A model of another type is rebuilt from its full serialized
            // state, the same as any other raw payload.
            Value::Model(model) => ty
                .create_from_json(model.to_json(true))
                .map(Value::Model),
            Value::Map(map) => ty.create_from(map).map(Value::Model),
            other => Err(mismatch(kind, &other)),
        },
    }
}

/// A short name for a JSON value, used in error messages.
pub(crate) fn json_type_name(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
