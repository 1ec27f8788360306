//! `ContentCache` — a bounded, per-client FIFO of not-yet-claimed split
//! content, used to resolve the content-reassembly cache-peek cases
//! when an envelope and its content arrive out of order.
//!
//! Uses the same buffered-channel idiom as [`crate::queue`], simplified
//! here to a bounded `VecDeque` per client since reassembly never needs
//! backpressure, only bounded retention.

use crate::core::types::{ClientId, ContentMessage};
use crate::events::EventBus;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// A bounded FIFO of [`ContentMessage`]s awaiting a matching envelope,
/// keyed by the submitting client.
///
/// Per-client capacity defaults to [`crate::core::config::SizingConfig::content_buffer_size`];
/// the oldest unclaimed entry is evicted once a client's queue is full.
pub struct ContentCache {
    capacity: usize,
    entries: Arc<Mutex<HashMap<ClientId, VecDeque<ContentMessage>>>>,
    events: EventBus<ClientId>,
}

impl ContentCache {
    /// Create a cache with the given per-client capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Arc::new(Mutex::new(HashMap::new())),
            events: EventBus::default(),
        }
    }

    /// Record a content message that arrived before its envelope, and
    /// notify anyone waiting on content for this client
    /// ([`ContentCache::subscribe`]).
    pub async fn set(&self, content: ContentMessage) {
        let mut guard = self.entries.lock().await;
        let queue = guard.entry(content.client_id.clone()).or_default();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        let client_id = content.client_id.clone();
        queue.push_back(content);
        drop(guard);
        self.events.publish(client_id);
    }

    /// Subscribe to arrival notifications, keyed by the client that just
    /// had content inserted.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientId> {
        self.events.subscribe()
    }

    /// Look at (without removing) the oldest unclaimed content for a
    /// client, whatever its `client_sequence_number` happens to be. The
    /// three reassembly cases compare this against
    /// the envelope's own sequence number.
    pub async fn peek(&self, client_id: &str) -> Option<ContentMessage> {
        self.entries.lock().await.get(client_id).and_then(|q| q.front()).cloned()
    }

    /// Claim (remove and return) the oldest unclaimed content for a
    /// client, regardless of its `client_sequence_number`.
    pub async fn get(&self, client_id: &str) -> Option<ContentMessage> {
        self.entries.lock().await.get_mut(client_id).and_then(|q| q.pop_front())
    }

    /// Number of unclaimed entries currently buffered for a client.
    pub async fn len_for(&self, client_id: &str) -> usize {
        self.entries
            .lock()
            .await
            .get(client_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(client_id: &str, csn: u64) -> ContentMessage {
        ContentMessage {
            client_id: client_id.to_string(),
            client_sequence_number: csn,
            contents: json!({ "n": csn }),
        }
    }

    #[tokio::test]
    async fn get_pops_fifo_order() {
        let cache = ContentCache::new(10);
        cache.set(content("c1", 1)).await;
        cache.set(content("c1", 2)).await;

        let first = cache.get("c1").await.unwrap();
        assert_eq!(first.client_sequence_number, 1);
        assert_eq!(cache.len_for("c1").await, 1);
        let second = cache.get("c1").await.unwrap();
        assert_eq!(second.client_sequence_number, 2);
        assert!(cache.get("c1").await.is_none());
    }

    #[tokio::test]
    async fn evicts_oldest_past_capacity() {
        let cache = ContentCache::new(2);
        cache.set(content("c1", 1)).await;
        cache.set(content("c1", 2)).await;
        cache.set(content("c1", 3)).await;

        assert_eq!(cache.len_for("c1").await, 2);
        let peeked = cache.peek("c1").await.unwrap();
        assert_eq!(peeked.client_sequence_number, 2); // entry 1 was evicted
    }

    #[tokio::test]
    async fn set_notifies_subscribers_with_the_client_id() {
        let cache = ContentCache::new(10);
        let mut rx = cache.subscribe();
        cache.set(content("c1", 1)).await;
        assert_eq!(rx.recv().await.unwrap(), "c1");
    }

    #[tokio::test]
    async fn clients_are_isolated() {
        let cache = ContentCache::new(10);
        cache.set(content("c1", 1)).await;
        assert_eq!(cache.len_for("c2").await, 0);
    }
}
