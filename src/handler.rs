//! The handler-strategy collaborator contract.
//!
//! The manager never interprets op content — it only sequences, gap-fills
//! and reassembles. Interpretation belongs entirely to an injected
//! [`HandlerStrategy`], split into `prepare`/`process` so expensive
//! decode/validate work can run concurrently with the next op's
//! reassembly while `process` itself stays ordered.

use crate::core::types::{Opaque, SequencedMessage, Signal};
use crate::core::Result;
use async_trait::async_trait;

/// Interprets sequenced ops and signals once the manager has finished
/// ordering and reassembling them.
#[async_trait]
pub trait HandlerStrategy: Send + Sync {
    /// Do any work that can run ahead of strict ordering (decode,
    /// validate) and hand back a value `process` will receive in order.
    async fn prepare(&self, message: &SequencedMessage) -> Result<Opaque>;

    /// Apply a prepared op, in sequence-number order.
    async fn process(&self, message: &SequencedMessage, prepared: Opaque) -> Result<()>;

    /// Called after each op has been processed, with the same message
    /// and prepared context `process` just received; used for e.g.
    /// releasing a per-op resource acquired in `prepare`.
    async fn post_process(&self, _message: &SequencedMessage, _context: Opaque) -> Result<()> {
        Ok(())
    }

    /// Handle a signal. Signals are never gap-filled or ordered against
    /// ops; this is the one delivery that can race processing.
    async fn process_signal(&self, signal: &Signal) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// A handler that records everything it sees, without interpreting
    /// it. Used by unit tests and the session demo.
    pub struct RecordingHandler {
        pub processed: StdMutex<Vec<u64>>,
        pub signals: StdMutex<Vec<Opaque>>,
    }

    impl RecordingHandler {
        pub fn new() -> Self {
            Self {
                processed: StdMutex::new(Vec::new()),
                signals: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HandlerStrategy for RecordingHandler {
        async fn prepare(&self, message: &SequencedMessage) -> Result<Opaque> {
            Ok(message.contents.clone().unwrap_or(Opaque::Null))
        }

        async fn process(&self, message: &SequencedMessage, _prepared: Opaque) -> Result<()> {
            self.processed.lock().unwrap().push(message.sequence_number);
            Ok(())
        }

        async fn process_signal(&self, signal: &Signal) -> Result<()> {
            self.signals.lock().unwrap().push(signal.content.clone());
            Ok(())
        }
    }
}
