//! Trellis Core
//!
//! This crate provides the core runtime for Trellis data models: typed,
//! observable, dirty-tracking model objects with declarative attribute
//! schemas and nested-model composition.
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `model`: schemas, instances, the write path, dirty tracking, and
//!   lifecycle operations (reset, update, duplicate, serialization)
//! - `event`: the publish/subscribe layer — filtered listeners addressed
//!   by structured keypaths
//!
//! # Example
//!
//! ```
//! use trellis_core::{model, Value};
//!
//! let address = model("Address").attr("name", "").attr("street", "");
//! let user = model("User").attr("name", "").attr("address", &address);
//!
//! let u = user
//!     .create_from_json(serde_json::json!({
//!         "name": "A",
//!         "address": { "name": "B", "street": "S" }
//!     }))
//!     .unwrap();
//!
//! // Changes anywhere in the graph surface on the root with a keypath.
//! u.on_change(|event| {
//!     println!("{} changed to {:?}", event.path, event.value);
//! });
//!
//! let addr = u.get("address");
//! addr.as_model().unwrap().set("name", "C").unwrap();
//! assert!(u.is_dirty());
//!
//! u.reset();
//! assert!(!u.is_dirty());
//! assert_eq!(addr.as_model().unwrap().get("name"), Value::from("B"));
//! ```

pub mod event;
pub mod model;

pub use event::{
    ChangeEvent, Emitter, Filter, KeyPath, KeyPathError, ListenerId, Notification, Segment,
};
pub use model::{
    coerce, model, Accessor, AttrSpec, Kind, Model, ModelError, ModelType, Preset, Value, WeakModel,
};
