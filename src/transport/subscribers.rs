//! Subscriber registry with per-handler fault isolation.
//!
//! Used for raw inbound frames, handler events and disconnect
//! notifications.
//!
//! - Handlers run synchronously, in registration order.
//! - The handler list is snapshotted before dispatch, so a handler may
//!   subscribe or unsubscribe (itself included) while it runs.
//! - A panicking handler is logged and skipped; later handlers still run.
//! - Tokens are unique across all registries in the process.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::identifiers::SubscriptionId;

// ============================================================================
// Types
// ============================================================================

/// Subscriber callback type.
pub type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Next token value, shared by every registry.
static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// SubscriberRegistry
// ============================================================================

/// Ordered list of callbacks with stable unsubscribe tokens.
pub struct SubscriberRegistry<T> {
    /// Registered callbacks in registration order.
    entries: Mutex<Vec<(SubscriptionId, Subscriber<T>)>>,
    /// Registry name for logging.
    name: &'static str,
}

impl<T> SubscriberRegistry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            name,
        }
    }

    /// Registers a callback and returns its token.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, Arc::new(handler)));
        trace!(registry = self.name, %id, "Subscriber registered");
        id
    }

    /// Removes a callback. Returns `false` if the token is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        before != entries.len()
    }

    /// Returns the number of registered callbacks.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no callbacks are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes every callback.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Delivers `value` to every callback registered at call time.
    ///
    /// Returns the number of callbacks that panicked.
    pub fn emit(&self, value: &T) -> usize {
        let snapshot: Vec<(SubscriptionId, Subscriber<T>)> = self.entries.lock().clone();
        let mut faults = 0;

        for (id, handler) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
                faults += 1;
                warn!(registry = self.name, %id, "Subscriber panicked; continuing dispatch");
            }
        }

        faults
    }
}

// ============================================================================
// Tests
// ============================================================================
