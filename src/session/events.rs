//! Handler events pushed by the server.

// ============================================================================
// Imports
// ============================================================================

use crate::identifiers::SubscriptionId;
use crate::protocol::Handler;
use crate::transport::SubscriberRegistry;

// ============================================================================
// HandlerEvent
// ============================================================================

/// One handler decoded from an unsolicited server frame.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerEvent {
    /// JSON-RPC method of the carrying frame.
    pub method: String,
    /// Server sequence number of the frame, if present.
    pub sequence_number: Option<i64>,
    /// The decoded handler.
    pub handler: Handler,
}

// ============================================================================
// HandlerEventEmitter
// ============================================================================

/// Fans handler events out to subscribers.
///
/// Subscribers run synchronously in registration order; a panicking
/// subscriber does not affect the others.
pub struct HandlerEventEmitter {
    registry: SubscriberRegistry<HandlerEvent>,
}

impl HandlerEventEmitter {
    /// Creates an emitter with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: SubscriberRegistry::new("handler-event"),
        }
    }

    /// Registers a subscriber.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&HandlerEvent) + Send + Sync + 'static,
    {
        self.registry.subscribe(handler)
    }

    /// Removes a subscriber.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// Delivers an event. Returns the number of faulted subscribers.
    pub fn emit(&self, event: &HandlerEvent) -> usize {
        self.registry.emit(event)
    }

    /// Returns the number of subscribers.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }
}

impl Default for HandlerEventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
