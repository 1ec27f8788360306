//! Shared fakes for the integration test suite. Each property-group test
//! file pulls this in with `mod support; use support::*;` rather than
//! reusing the crate's own `#[cfg(test)]` fakes, which are `pub(crate)`
//! and not visible outside the crate.

use async_trait::async_trait;
use delta_manager::connection::{ConnectionDetails, DeltaConnection, DeltaConnectionEvent};
use delta_manager::core::types::{ClientId, DocumentMessage, Opaque, SequencedMessage, Signal};
use delta_manager::core::Result;
use delta_manager::handler::HandlerStrategy;
use delta_manager::storage::{DeltaStorageClient, DocumentServiceClient};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

pub fn message(seq: u64, client_id: &str, client_seq: u64, contents: Option<Opaque>) -> SequencedMessage {
    SequencedMessage {
        sequence_number: seq,
        minimum_sequence_number: 0,
        client_id: ClientId::from(client_id),
        client_sequence_number: client_seq,
        reference_sequence_number: 0,
        message_type: delta_manager::core::types::MessageType::Operation,
        contents,
        traces: Vec::new(),
    }
}

pub fn empty_details() -> ConnectionDetails {
    ConnectionDetails {
        client_id: delta_manager::core::types::new_client_id(),
        max_message_size: None,
        initial_messages: Vec::new(),
        initial_contents: Vec::new(),
        initial_signals: Vec::new(),
    }
}

/// A connection whose `connect()` can be made to fail a fixed number of
/// times before succeeding, to exercise reconnect backoff.
pub struct FlakyConnection {
    pub details: ConnectionDetails,
    sender: broadcast::Sender<DeltaConnectionEvent>,
    pub connect_attempts: Mutex<Vec<std::time::Instant>>,
    pub failures_remaining: std::sync::atomic::AtomicU32,
    pub submitted: Mutex<Vec<DocumentMessage>>,
    pub submitted_async: Mutex<Vec<DocumentMessage>>,
    pub closed: AtomicBool,
}

impl FlakyConnection {
    pub fn new(details: ConnectionDetails, failures_before_success: u32) -> (Arc<Self>, broadcast::Sender<DeltaConnectionEvent>) {
        let (sender, _) = broadcast::channel(128);
        let connection = Arc::new(Self {
            details,
            sender: sender.clone(),
            connect_attempts: Mutex::new(Vec::new()),
            failures_remaining: std::sync::atomic::AtomicU32::new(failures_before_success),
            submitted: Mutex::new(Vec::new()),
            submitted_async: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        (connection, sender)
    }
}

#[async_trait]
impl DeltaConnection for FlakyConnection {
    async fn connect(&self) -> Result<(ConnectionDetails, broadcast::Receiver<DeltaConnectionEvent>)> {
        self.connect_attempts.lock().unwrap().push(std::time::Instant::now());
        if self.failures_remaining.load(Ordering::SeqCst) > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(delta_manager::core::error::ConnectionError::ConnectFailed(
                "simulated connect failure".into(),
            )
            .into());
        }
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

    async fn submit_signal(&self, _signal: Signal) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A connection fake identical in shape to the crate's own test-only
/// fake, reconstructed here because that one is `pub(crate)`.
pub struct FakeConnection {
    pub details: ConnectionDetails,
    sender: broadcast::Sender<DeltaConnectionEvent>,
    pub submitted: Mutex<Vec<DocumentMessage>>,
    pub submitted_async: Mutex<Vec<DocumentMessage>>,
    pub submitted_signals: Mutex<Vec<Signal>>,
}

impl FakeConnection {
    pub fn new(details: ConnectionDetails) -> (Arc<Self>, broadcast::Sender<DeltaConnectionEvent>) {
        let (sender, _) = broadcast::channel(128);
        let connection = Arc::new(Self {
            details,
            sender: sender.clone(),
            submitted: Mutex::new(Vec::new()),
            submitted_async: Mutex::new(Vec::new()),
            submitted_signals: Mutex::new(Vec::new()),
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

/// A delta storage that returns an empty page a fixed number of times
/// before returning real data, recording the wall-clock time of every
/// `get` call — used to pin down the gap-fill retry backoff's actual
/// delay sequence.
pub struct FlakyStorage {
    pub call_times: Mutex<Vec<std::time::Instant>>,
    empty_responses_remaining: std::sync::atomic::AtomicU32,
    messages: Vec<SequencedMessage>,
}

impl FlakyStorage {
    pub fn new(empty_responses_before_success: u32, messages: Vec<SequencedMessage>) -> Self {
        Self {
            call_times: Mutex::new(Vec::new()),
            empty_responses_remaining: std::sync::atomic::AtomicU32::new(empty_responses_before_success),
            messages,
        }
    }
}

#[async_trait]
impl DeltaStorageClient for FlakyStorage {
    async fn get(&self, from: u64, to: u64) -> Result<Vec<SequencedMessage>> {
        self.call_times.lock().unwrap().push(std::time::Instant::now());
        if self.empty_responses_remaining.load(Ordering::SeqCst) > 0 {
            self.empty_responses_remaining.fetch_sub(1, Ordering::SeqCst);
            return Ok(Vec::new());
        }
        Ok(self
            .messages
            .iter()
            .filter(|m| m.sequence_number >= from && m.sequence_number <= to)
            .cloned()
            .collect())
    }
}

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

/// A handler that records processed sequence numbers and received
/// signals without interpreting either.
pub struct RecordingHandler {
    pub processed: Mutex<Vec<u64>>,
    pub signals: Mutex<Vec<Opaque>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self {
            processed: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<u64> {
        self.processed.lock().unwrap().clone()
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
