//! Model Runtime
//!
//! Typed, observable, dirty-tracking data models.
//!
//! # Concepts
//!
//! ## Model types
//!
//! A [`ModelType`] is a shared schema: an ordered table of attribute
//! declarations built with the chainable [`ModelType::attr`]. Each
//! declaration carries a preset value, a persistence flag, an optional
//! coercion target, and an optional computed derivation.
//!
//! ## Instances
//!
//! A [`Model`] is a handle to one instance: a value store plus the dirty
//! machinery. Writes go through a single path that short-circuits on
//! equality, coerces, swaps nested subscriptions, maintains the
//! original-value snapshot, and emits change notifications.
//!
//! ## Nesting
//!
//! An attribute whose value is itself a model binds the parent to the
//! child's notifications. Changes re-emit on the parent under a dotted
//! keypath (`address.name`); dirty transitions are consumed to keep the
//! parent's dirty flag derived correctly at any depth.
//!
//! ## Dirty tracking
//!
//! An instance is dirty when any persistent attribute has diverged from
//! its baseline or any bound nested model is dirty. The baseline is
//! established at construction and moved by `reset_dirty`; `reset`
//! returns to it.

mod accessor;
mod instance;
mod ops;
mod schema;
mod value;

pub use accessor::Accessor;
pub use instance::{Model, WeakModel};
pub use schema::{model, AttrSpec, ComputeFn, ModelType, Preset, PresetFn};
pub use value::{coerce, Kind, ModelError, Value};
