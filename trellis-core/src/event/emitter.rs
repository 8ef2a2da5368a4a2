//! Event Emitter
//!
//! The publish/subscribe primitive the model runtime is built on. Every
//! model instance owns one emitter for its change and dirty notifications,
//! and every model type owns one for construct notifications.
//!
//! # Dispatch
//!
//! Subscribers register with a [`Filter`]:
//!
//! - `Any` receives every notification (this is what nested-model bindings
//!   use, since they must see both changes and dirty transitions).
//! - `Exact(path)` receives change notifications whose path matches
//!   exactly (the per-attribute topic).
//! - `Prefix(path)` receives change notifications anywhere under a
//!   subtree of the object graph.
//!
//! # Reentrancy
//!
//! `emit` snapshots the matching callbacks while holding the subscriber
//! lock, then invokes them with no lock held. A callback may therefore
//! subscribe, unsubscribe, or trigger further emissions on this or any
//! other emitter without deadlocking. Callbacks registered during an
//! emission do not observe the in-flight notification.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::event::keypath::KeyPath;
use crate::model::{Model, Value};

/// Counter for generating unique listener IDs.
static LISTENER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a registered listener.
///
/// Returned by the `on` family of methods and used to detach the listener
/// later. IDs are unique across all emitters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(LISTENER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A single attribute change, carrying the full path from the emitting
/// model down to the attribute that was written.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Path of the changed attribute relative to the subscribed model.
    pub path: KeyPath,

    /// The value now stored.
    pub value: Value,

    /// The value (or resolved preset) that was replaced.
    pub old: Value,
}

/// A notification delivered to emitter subscribers.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A new instance of a model type was constructed. Fired on the model
    /// type's emitter, once per instantiation, after initial values are
    /// seeded.
    Construct(Model),

    /// An attribute changed, directly or in a nested model.
    Change(ChangeEvent),

    /// The instance's derived dirty flag flipped. Parent bindings consume
    /// this to maintain their dirty counters; it is never re-emitted under
    /// a keypath.
    Dirty { dirty: bool },
}

impl Notification {
    /// The change event, if this is a change notification.
    pub fn as_change(&self) -> Option<&ChangeEvent> {
        match self {
            Notification::Change(event) => Some(event),
            _ => None,
        }
    }
}

/// Which notifications a listener receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every notification.
    Any,

    /// Change notifications with exactly this path.
    Exact(KeyPath),

    /// Change notifications at or under this path.
    Prefix(KeyPath),
}

impl Filter {
    fn matches(&self, notification: &Notification) -> bool {
        match self {
            Filter::Any => true,
            Filter::Exact(path) => notification
                .as_change()
                .is_some_and(|event| event.path == *path),
            Filter::Prefix(path) => notification
                .as_change()
                .is_some_and(|event| event.path.starts_with(path)),
        }
    }
}

type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

struct Subscription {
    id: ListenerId,
    filter: Filter,
    callback: Callback,
}

/// A list of filtered subscribers.
#[derive(Default)]
pub struct Emitter {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for every notification.
    pub fn on<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.on_filtered(Filter::Any, callback)
    }

    /// Register a listener with an explicit filter.
    pub fn on_filtered<F>(&self, filter: Filter, callback: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.subscriptions.write().push(Subscription {
            id,
            filter,
            callback: Arc::new(callback),
        });
        id
    }

    /// Detach a listener. Returns false if the ID was not registered,
    /// which callers treat as a no-op.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id != id);
        subscriptions.len() != before
    }

    /// Deliver a notification to every matching listener.
    pub fn emit(&self, notification: &Notification) {
        // Snapshot the matching callbacks, then release the lock before
        // invoking them so listeners can re-enter this emitter.
        let matched: Vec<Callback> = {
            let subscriptions = self.subscriptions.read();
            subscriptions
                .iter()
                .filter(|subscription| subscription.filter.matches(notification))
                .map(|subscription| Arc::clone(&subscription.callback))
                .collect()
        };
        for callback in matched {
            callback(notification);
        }
    }

    /// The number of registered listeners.
    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    fn change(path: &str) -> Notification {
        Notification::Change(ChangeEvent {
            path: path.parse().unwrap(),
            value: Value::Null,
            old: Value::Null,
        })
    }

    #[test]
    fn any_listener_receives_all_notifications() {
        let emitter = Emitter::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        emitter.on(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(&change("name"));
        emitter.emit(&Notification::Dirty { dirty: true });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn exact_filter_matches_only_its_path() {
        let emitter = Emitter::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        emitter.on_filtered(Filter::Exact("address.name".parse().unwrap()), move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(&change("address.name"));
        emitter.emit(&change("address"));
        emitter.emit(&change("name"));
        emitter.emit(&Notification::Dirty { dirty: true });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prefix_filter_matches_a_subtree() {
        let emitter = Emitter::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        emitter.on_filtered(Filter::Prefix(KeyPath::from_key("address")), move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(&change("address"));
        emitter.emit(&change("address.name"));
        emitter.emit(&change("address.city.code"));
        emitter.emit(&change("name"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn off_detaches_a_listener() {
        let emitter = Emitter::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let id = emitter.on(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(&change("name"));
        assert!(emitter.off(id));
        emitter.emit(&change("name"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!emitter.off(id));
    }

    #[test]
    fn listener_may_reenter_the_emitter() {
        let emitter = Arc::new(Emitter::new());
        let count = Arc::new(AtomicI32::new(0));

        let inner_emitter = Arc::clone(&emitter);
        let count_clone = count.clone();
        emitter.on(move |notification| {
            if count_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                // Re-enter once from inside the callback.
                inner_emitter.emit(notification);
            }
        });

        emitter.emit(&change("name"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_ids_are_unique() {
        let emitter = Emitter::new();
        let a = emitter.on(|_| {});
        let b = emitter.on(|_| {});
        assert_ne!(a, b);
        assert_eq!(emitter.len(), 2);
    }
}
