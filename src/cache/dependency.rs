//! Dependency Module
//!
//! External change-detection capabilities that can invalidate an entry outside
//! of time-based rules.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

/// Callback invoked when a dependency changes.
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(pub u64);

// == Dependency Trait ==
/// Something an entry can depend on.
///
/// Implementations may call the listener from inside `subscribe` when the
/// source has already changed. They must not call it while holding their own
/// locks, since the listener unsubscribes itself.
pub trait Dependency: Send + Sync + fmt::Debug {
    /// Whether the underlying source changed since the dependency was created.
    fn has_changed(&self) -> bool;

    /// Starts change monitoring. Called once per owning entry when it is published.
    fn start(&self) {}

    /// Registers a listener for change notifications.
    fn subscribe(&self, listener: ChangeListener) -> Subscription;

    /// Removes a previously registered listener. Unknown handles are ignored.
    fn unsubscribe(&self, subscription: Subscription);
}

// == Signal Dependency ==
/// A dependency that changes when [`SignalDependency::signal`] is called.
#[derive(Default)]
pub struct SignalDependency {
    changed: AtomicBool,
    started: AtomicBool,
    next_id: AtomicU64,
    listeners: Mutex<Vec<(Subscription, ChangeListener)>>,
}

impl SignalDependency {
    /// Creates an unchanged dependency.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks the dependency as changed and notifies every listener.
    ///
    /// Listeners are called on a snapshot, outside of the listener lock. A
    /// panicking listener is logged and does not stop the others.
    pub fn signal(&self) {
        self.changed.store(true, Ordering::Release);

        let listeners: Vec<ChangeListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                warn!("Dependency listener panicked; continuing with remaining listeners");
            }
        }
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether [`Dependency::start`] has been called.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl Dependency for SignalDependency {
    fn has_changed(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    fn start(&self) {
        self.started.store(true, Ordering::Release);
    }

    fn subscribe(&self, listener: ChangeListener) -> Subscription {
        let subscription = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((subscription, listener));
        subscription
    }

    fn unsubscribe(&self, subscription: Subscription) {
        self.listeners.lock().retain(|(id, _)| *id != subscription);
    }
}

impl fmt::Debug for SignalDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalDependency")
            .field("changed", &self.has_changed())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
