//! The delta-storage collaborator contract and the gap-fill fetch loop
//! that drives it.
//!
//! `fetch_range` is deliberately free-standing rather than a method on
//! [`crate::manager::DeltaManager`]: it owns no manager state, only the
//! page/backoff bookkeeping, keeping the storage retry loop separate
//! from connection bookkeeping.

use crate::core::config::FetchConfig;
use crate::core::types::SequencedMessage;
use crate::core::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A historical op range store. Implementations are expected to
/// return however much of `[from, to]` they have in one call; an empty
/// result is not an error, it just means "not there yet" and the caller
/// backs off and retries.
#[async_trait]
pub trait DeltaStorageClient: Send + Sync {
    /// Fetch sequenced messages in `[from, to]` inclusive, in order.
    async fn get(&self, from: u64, to: u64) -> Result<Vec<SequencedMessage>>;
}

/// Resolves a [`DeltaStorageClient`] as part of establishing a connection.
#[async_trait]
pub trait DocumentServiceClient: Send + Sync {
    /// Resolve the delta storage client for the current session.
    async fn connect_to_delta_storage(&self) -> Result<Arc<dyn DeltaStorageClient>>;
}

/// Fetch every sequenced message in `[from, to]` inclusive, paginating at
/// `config.max_batch_deltas` per request and retrying empty/failed pages
/// with doubling backoff bounded by `config.max_fetch_delay`. Backoff
/// resets to `config.missing_fetch_delay` after any page that makes
/// progress.
pub async fn fetch_range(
    storage: &dyn DeltaStorageClient,
    from: u64,
    to: u64,
    config: &FetchConfig,
) -> Result<Vec<SequencedMessage>> {
    let mut collected = Vec::new();
    if from > to {
        return Ok(collected);
    }

    let mut cursor = from;
    let mut delay = config.missing_fetch_delay;

    loop {
        let page_to = cursor.saturating_add(config.max_batch_deltas - 1).min(to);
        match storage.get(cursor, page_to).await {
            Ok(batch) if !batch.is_empty() => {
                let last_seq = batch.last().expect("checked non-empty").sequence_number;
                collected.extend(batch);
                if last_seq >= to {
                    break;
                }
                cursor = last_seq + 1;
                delay = config.missing_fetch_delay;
            }
            Ok(_empty) => {
                tracing::warn!(from = cursor, to = page_to, ?delay, "empty delta range, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(config.max_fetch_delay);
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(from = cursor, to = page_to, ?delay, error = %e, "delta fetch failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(config.max_fetch_delay);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(collected)
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;

    /// An in-memory delta store used by manager tests and the session
    /// demo: answers `get(from, to)` by filtering a fixed backing vec.
    pub struct InMemoryDeltaStorage {
        messages: Vec<SequencedMessage>,
    }

    impl InMemoryDeltaStorage {
        pub fn new(messages: Vec<SequencedMessage>) -> Self {
            Self { messages }
        }
    }

    #[async_trait]
    impl DeltaStorageClient for InMemoryDeltaStorage {
        async fn get(&self, from: u64, to: u64) -> Result<Vec<SequencedMessage>> {
            Ok(self
                .messages
                .iter()
                .filter(|m| m.sequence_number >= from && m.sequence_number <= to)
                .cloned()
                .collect())
        }
    }

    /// A document service that always resolves to the same storage
    /// client, skipping any real service/credential resolution.
    pub struct StaticDocumentService {
        storage: Arc<dyn DeltaStorageClient>,
    }

    impl StaticDocumentService {
        pub fn new(storage: Arc<dyn DeltaStorageClient>) -> Self {
            Self { storage }
        }
    }

    #[async_trait]
    impl DocumentServiceClient for StaticDocumentService {
        async fn connect_to_delta_storage(&self) -> Result<Arc<dyn DeltaStorageClient>> {
            Ok(self.storage.clone())
        }
    }
}
