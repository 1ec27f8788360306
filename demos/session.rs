/// Example demonstrating an end-to-end delta manager session.
///
/// Wires an in-memory fake connection and fake storage behind the
/// `DeltaConnection`/`DocumentServiceClient`/`DeltaStorageClient` traits,
/// attaches a pass-through handler, and walks through ordered delivery,
/// out-of-order catch-up, a gap-fill backfill from storage, and a
/// split-content outbound submission.
use async_trait::async_trait;
use delta_manager::connection::{ConnectionDetails, DeltaConnection, DeltaConnectionEvent};
use delta_manager::core::types::{new_client_id, MessageType, Opaque, SequencedMessage, Signal};
use delta_manager::core::Result;
use delta_manager::handler::HandlerStrategy;
use delta_manager::storage::{DeltaStorageClient, DocumentServiceClient};
use delta_manager::{ClientType, DeltaManager, DeltaManagerConfig};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    println!("=== Delta Manager Session Example ===\n");

    demonstrate_ordered_delivery().await;
    demonstrate_gap_fill().await;
    demonstrate_split_outbound().await;

    println!("Example completed successfully!");
}

/// 1. A backlog delivered in order processes straight through, with the
/// reference sequence number tracking the last-handled message.
async fn demonstrate_ordered_delivery() {
    println!("1. Ordered delivery from the initial backlog:");

    let details = ConnectionDetails {
        client_id: new_client_id(),
        max_message_size: None,
        initial_messages: vec![
            sequenced(1, "alice", 1, Some(json!("hello"))),
            sequenced(2, "alice", 2, Some(json!("world"))),
        ],
        initial_contents: Vec::new(),
        initial_signals: Vec::new(),
    };
    let (connection, _sender) = FakeConnection::new(details);
    let storage = Arc::new(StaticDocumentService::new(Arc::new(InMemoryDeltaStorage::new(Vec::new()))));
    let handler = Arc::new(PrintingHandler::new());

    let manager = DeltaManager::new(DeltaManagerConfig::default(), ClientType::Browser, storage, connection);
    manager.attach_op_handler(0, handler.clone(), true).await;
    manager.connect("demo").await.expect("connect");

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(handler.seen(), vec![1, 2]);
    assert_eq!(manager.reference_sequence_number().await, 2);
    println!("   ✓ processed {:?}, reference sequence number now {}\n", handler.seen(), manager.reference_sequence_number().await);
}

/// 2. A gap in the inbound stream triggers a storage fetch; once the
/// fetch returns, the manager delivers everything in order.
async fn demonstrate_gap_fill() {
    println!("2. Gap-fill backfill from delta storage:");

    let details = ConnectionDetails {
        client_id: new_client_id(),
        max_message_size: None,
        initial_messages: Vec::new(),
        initial_contents: Vec::new(),
        initial_signals: Vec::new(),
    };
    let (connection, sender) = FakeConnection::new(details);
    let backfill = vec![
        sequenced(2, "bob", 2, Some(json!("b"))),
        sequenced(3, "bob", 3, Some(json!("c"))),
    ];
    let storage = Arc::new(StaticDocumentService::new(Arc::new(InMemoryDeltaStorage::new(backfill))));
    let handler = Arc::new(PrintingHandler::new());

    let manager = DeltaManager::new(DeltaManagerConfig::default(), ClientType::Browser, storage, connection);
    manager.attach_op_handler(0, handler.clone(), true).await;
    manager.connect("demo").await.expect("connect");
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    sender.send(DeltaConnectionEvent::Op(sequenced(1, "bob", 1, Some(json!("a"))))).unwrap();
    sender.send(DeltaConnectionEvent::Op(sequenced(4, "bob", 4, Some(json!("d"))))).unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(handler.seen(), vec![1, 2, 3, 4]);
    println!("   ✓ gap at sequence 2-3 backfilled, processed {:?}\n", handler.seen());
}

/// 3. A large outbound op is split: `submitAsync` carries the full
/// envelope with contents, then the stripped envelope goes through
/// `submit`.
async fn demonstrate_split_outbound() {
    println!("3. Split-content outbound submission:");

    let mut config = DeltaManagerConfig::default();
    config.sizing.max_content_size = 16;

    let details = ConnectionDetails {
        client_id: new_client_id(),
        max_message_size: None,
        initial_messages: Vec::new(),
        initial_contents: Vec::new(),
        initial_signals: Vec::new(),
    };
    let (connection, _sender) = FakeConnection::new(details);
    let storage = Arc::new(StaticDocumentService::new(Arc::new(InMemoryDeltaStorage::new(Vec::new()))));
    let handler = Arc::new(PrintingHandler::new());

    let manager = DeltaManager::new(config, ClientType::Browser, storage, connection.clone());
    manager.attach_op_handler(0, handler, true).await;
    manager.connect("demo").await.expect("connect");

    let big_payload = "x".repeat(64);
    manager
        .submit(MessageType::Operation, Some(json!(big_payload)))
        .await
        .expect("submit");

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let async_submits = connection.submitted_async.lock().unwrap().len();
    let submits = connection.submitted.lock().unwrap().len();
    assert_eq!(async_submits, 1);
    assert_eq!(submits, 1);
    assert!(connection.submitted.lock().unwrap()[0].contents.is_none());
    println!("   ✓ submitAsync carried the content, submit carried a stripped envelope\n");
}

fn sequenced(seq: u64, client_id: &str, client_seq: u64, contents: Option<Opaque>) -> SequencedMessage {
    SequencedMessage {
        sequence_number: seq,
        minimum_sequence_number: 0,
        client_id: client_id.to_string(),
        client_sequence_number: client_seq,
        reference_sequence_number: 0,
        message_type: MessageType::Operation,
        contents,
        traces: Vec::new(),
    }
}

/// A connection that answers `connect()` with a fixed backlog and lets
/// the demo push further events directly onto its broadcast sender.
struct FakeConnection {
    details: ConnectionDetails,
    sender: broadcast::Sender<DeltaConnectionEvent>,
    submitted: Mutex<Vec<delta_manager::core::types::DocumentMessage>>,
    submitted_async: Mutex<Vec<delta_manager::core::types::DocumentMessage>>,
}

impl FakeConnection {
    fn new(details: ConnectionDetails) -> (Arc<Self>, broadcast::Sender<DeltaConnectionEvent>) {
        let (sender, _) = broadcast::channel(128);
        let connection = Arc::new(Self {
            details,
            sender: sender.clone(),
            submitted: Mutex::new(Vec::new()),
            submitted_async: Mutex::new(Vec::new()),
        });
        (connection, sender)
    }
}

#[async_trait]
impl DeltaConnection for FakeConnection {
    async fn connect(&self) -> Result<(ConnectionDetails, broadcast::Receiver<DeltaConnectionEvent>)> {
        Ok((self.details.clone(), self.sender.subscribe()))
    }

    async fn submit(&self, message: delta_manager::core::types::DocumentMessage) -> Result<()> {
        self.submitted.lock().unwrap().push(message);
        Ok(())
    }

    async fn submit_async(&self, message: delta_manager::core::types::DocumentMessage) -> Result<()> {
        self.submitted_async.lock().unwrap().push(message);
        Ok(())
    }

    async fn submit_signal(&self, _signal: Signal) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}

/// A delta store backed by a fixed vec, filtered by range on `get`.
struct InMemoryDeltaStorage {
    messages: Vec<SequencedMessage>,
}

impl InMemoryDeltaStorage {
    fn new(messages: Vec<SequencedMessage>) -> Self {
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

/// A document service that always resolves to the same storage.
struct StaticDocumentService {
    storage: Arc<dyn DeltaStorageClient>,
}

impl StaticDocumentService {
    fn new(storage: Arc<dyn DeltaStorageClient>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl DocumentServiceClient for StaticDocumentService {
    async fn connect_to_delta_storage(&self) -> Result<Arc<dyn DeltaStorageClient>> {
        Ok(self.storage.clone())
    }
}

/// A handler that prints and records each processed sequence number
/// without interpreting the payload.
struct PrintingHandler {
    processed: Mutex<Vec<u64>>,
}

impl PrintingHandler {
    fn new() -> Self {
        Self { processed: Mutex::new(Vec::new()) }
    }

    fn seen(&self) -> Vec<u64> {
        self.processed.lock().unwrap().clone()
    }
}

#[async_trait]
impl HandlerStrategy for PrintingHandler {
    async fn prepare(&self, message: &SequencedMessage) -> Result<Opaque> {
        Ok(message.contents.clone().unwrap_or(Opaque::Null))
    }

    async fn process(&self, message: &SequencedMessage, prepared: Opaque) -> Result<()> {
        println!("   processing seq={} contents={prepared}", message.sequence_number);
        self.processed.lock().unwrap().push(message.sequence_number);
        Ok(())
    }

    async fn process_signal(&self, _signal: &Signal) -> Result<()> {
        Ok(())
    }
}

#[allow(dead_code)]
mod alternative_handler_examples {
    use super::*;

    /// A handler that drops everything, demonstrating that `DeltaManager`
    /// never depends on a specific `HandlerStrategy` implementation.
    pub struct DiscardingHandler;

    #[async_trait]
    impl HandlerStrategy for DiscardingHandler {
        async fn prepare(&self, _message: &SequencedMessage) -> Result<Opaque> {
            Ok(Opaque::Null)
        }

        async fn process(&self, _message: &SequencedMessage, _prepared: Opaque) -> Result<()> {
            Ok(())
        }

        async fn process_signal(&self, _signal: &Signal) -> Result<()> {
            Ok(())
        }
    }
}
