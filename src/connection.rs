//! The connection collaborator contract.
//!
//! The manager never speaks a wire protocol itself — it drives an
//! injected [`DeltaConnection`] implementation and reacts to the events
//! it publishes: an async collaborator driven by the runtime, with
//! events surfaced rather than polled, using the `async-trait` pattern
//! for dyn-compatible async collaborators.

use crate::core::types::{ClientId, ContentMessage, DocumentMessage, SequencedMessage, Signal};
use crate::core::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Details handed back once a connection is established.
#[derive(Debug, Clone)]
pub struct ConnectionDetails {
    /// The id assigned to this connection generation.
    pub client_id: ClientId,
    /// Largest message size this connection will accept, or `None` to
    /// fall back to [`crate::core::config::SizingConfig::default_chunk_size`].
    pub max_message_size: Option<usize>,
    /// Ops the server catches the client up on as part of the handshake.
    pub initial_messages: Vec<SequencedMessage>,
    /// Split content accompanying `initial_messages`.
    pub initial_contents: Vec<ContentMessage>,
    /// Signals buffered by the server before this client attached.
    pub initial_signals: Vec<Signal>,
}

/// Events published by a live connection. The manager
/// subscribes to these for the lifetime of a connection generation.
#[derive(Debug, Clone)]
pub enum DeltaConnectionEvent {
    /// A sequenced op arrived on the inbound stream.
    Op(SequencedMessage),
    /// Split content arrived on the inbound content stream.
    OpContent(ContentMessage),
    /// A signal arrived.
    Signal(Signal),
    /// The server rejected/terminated this connection generation.
    Nack(String),
    /// The transport dropped without an explicit NACK.
    Disconnect(String),
    /// A keepalive reply, used only for round-trip telemetry.
    Pong,
    /// The connection reported an error that isn't fatal to the manager.
    Error(String),
}

/// The connection collaborator: owns the wire protocol, hands
/// the manager a typed event stream, and accepts outbound submissions.
#[async_trait]
pub trait DeltaConnection: Send + Sync {
    /// Establish (or re-establish) a connection generation, returning its
    /// details and an event stream scoped to this generation.
    async fn connect(&self) -> Result<(ConnectionDetails, broadcast::Receiver<DeltaConnectionEvent>)>;

    /// Submit an outbound envelope (already split if oversized).
    async fn submit(&self, message: DocumentMessage) -> Result<()>;

    /// Submit the full envelope (contents still attached) so the server
    /// can negotiate a sequence slot for the split content ahead of the
    /// stripped `submit` that follows.
    async fn submit_async(&self, message: DocumentMessage) -> Result<()>;

    /// Submit a signal.
    async fn submit_signal(&self, signal: Signal) -> Result<()>;

    /// Tear down this connection generation. Idempotent.
    async fn close(&self);
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    /// A connection fake used by unit tests: submits are recorded rather
    /// than sent anywhere, and inbound traffic is driven by pushing
    /// directly onto the broadcast sender.
    pub struct FakeConnection {
        pub details: ConnectionDetails,
        sender: broadcast::Sender<DeltaConnectionEvent>,
        pub submitted: StdMutex<Vec<DocumentMessage>>,
        pub submitted_async: StdMutex<Vec<DocumentMessage>>,
        pub submitted_signals: StdMutex<Vec<Signal>>,
    }

    impl FakeConnection {
        /// Returns an `Arc` (rather than a bare value) so tests can keep a
        /// handle for inspecting `submitted`/`submitted_async` after the
        /// same `Arc` has been handed to a manager as `Arc<dyn DeltaConnection>`.
        pub fn new(details: ConnectionDetails) -> (Arc<Self>, broadcast::Sender<DeltaConnectionEvent>) {
            let (sender, _) = broadcast::channel(128);
            let connection = Arc::new(Self {
                details,
                sender: sender.clone(),
                submitted: StdMutex::new(Vec::new()),
                submitted_async: StdMutex::new(Vec::new()),
                submitted_signals: StdMutex::new(Vec::new()),
            });
            (connection, sender)
        }
    }

    #[async_trait]
    impl DeltaConnection for FakeConnection {
        async fn connect(&self) -> Result<(ConnectionDetails, broadcast::Receiver<DeltaConnectionEvent>)> {
            Ok((self.details.clone(), self.sender.subscribe()))
        }

        async fn submit(&self, message: DocumentMessage) -> Result<()> {
            self.submitted.lock().unwrap().push(message);
            Ok(())
        }

        async fn submit_async(&self, message: DocumentMessage) -> Result<()> {
            self.submitted_async.lock().unwrap().push(message);
            Ok(())
        }

        async fn submit_signal(&self, signal: Signal) -> Result<()> {
            self.submitted_signals.lock().unwrap().push(signal);
            Ok(())
        }

        async fn close(&self) {}
    }
}
