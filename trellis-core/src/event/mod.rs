//! Event Layer
//!
//! The publish/subscribe collaborator the model runtime delegates to. It
//! knows nothing about schemas or dirty tracking; it delivers
//! [`Notification`]s to filtered listeners.
//!
//! Change notifications are addressed by [`KeyPath`] rather than by
//! concatenated topic strings: a nested model's change arrives at the
//! parent with the parent's attribute name prepended to the path, so
//! subscribers can match exact paths or whole subtrees structurally.

mod emitter;
mod keypath;

pub use emitter::{ChangeEvent, Emitter, Filter, ListenerId, Notification};
pub use keypath::{KeyPath, KeyPathError, Segment};
