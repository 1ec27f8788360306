//! Small typed publish/subscribe primitive.
//!
//! Replaces a loose string-keyed event emitter with a typed event enum
//! dispatched through a minimal broadcast bus. Used by [`crate::queue`]
//! (`resume`/`error`) and [`crate::manager`] (`connect`/`disconnect`/
//! `error`/`pong`/`processTime`).

use tokio::sync::broadcast;

/// A small broadcast bus for a fixed event type `E`.
///
/// Subscribers that aren't currently receiving simply miss events sent
/// while they were gone (the usual broadcast-channel semantics) — nothing
/// in this crate relies on replaying past events to a late subscriber.
pub struct EventBus<E: Clone> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Create a new bus with the given backlog capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Publish an event. Silently dropped if there are no subscribers.
    pub fn publish(&self, event: E) {
        let _ = self.sender.send(event);
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(32)
    }
}
