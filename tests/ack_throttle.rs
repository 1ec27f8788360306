//! Reference-sequence-number ack throttle.

mod support;

use delta_manager::connection::DeltaConnectionEvent;
use delta_manager::core::types::MessageType;
use delta_manager::{ClientType, DeltaManager, DeltaManagerConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::*;

#[tokio::test]
async fn burst_of_operations_produces_one_debounced_ack() {
    let (connection, sender) = FakeConnection::new(empty_details());
    let storage = Arc::new(StaticDocumentService::new(Arc::new(InMemoryDeltaStorage::new(Vec::new()))));
    let handler = Arc::new(RecordingHandler::new());

    let manager = DeltaManager::new(DeltaManagerConfig::default(), ClientType::Browser, storage, connection.clone());
    manager.attach_op_handler(0, handler.clone(), true).await;
    manager.connect("test").await.unwrap();

    for seq in 1..=10u64 {
        sender.send(DeltaConnectionEvent::Op(message(seq, "a", seq, Some(json!(seq))))).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.seen().len(), 10);
    assert!(connection.submitted.lock().unwrap().is_empty(), "ack must not fire before the debounce window elapses");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let submitted = connection.submitted.lock().unwrap();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].message_type, MessageType::NoOp);
}

#[tokio::test]
async fn propose_triggers_immediate_ack_with_no_timer() {
    let (connection, sender) = FakeConnection::new(empty_details());
    let storage = Arc::new(StaticDocumentService::new(Arc::new(InMemoryDeltaStorage::new(Vec::new()))));
    let handler = Arc::new(RecordingHandler::new());

    let manager = DeltaManager::new(DeltaManagerConfig::default(), ClientType::Browser, storage, connection.clone());
    manager.attach_op_handler(0, handler.clone(), true).await;
    manager.connect("test").await.unwrap();

    let mut propose = message(5, "a", 5, Some(json!("propose-it")));
    propose.message_type = MessageType::Propose;
    sender.send(DeltaConnectionEvent::Op(propose)).unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let submitted = connection.submitted.lock().unwrap();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].message_type, MessageType::NoOp);
    assert_eq!(submitted[0].reference_sequence_number, 5);
}

#[tokio::test]
async fn readonly_mode_suppresses_ack() {
    let (connection, sender) = FakeConnection::new(empty_details());
    let storage = Arc::new(StaticDocumentService::new(Arc::new(InMemoryDeltaStorage::new(Vec::new()))));
    let handler = Arc::new(RecordingHandler::new());

    let manager = DeltaManager::new(DeltaManagerConfig::default(), ClientType::Browser, storage, connection.clone());
    manager.attach_op_handler(0, handler.clone(), true).await;
    manager.connect("test").await.unwrap();
    manager.enable_readonly_mode().await;

    for seq in 1..=5u64 {
        sender.send(DeltaConnectionEvent::Op(message(seq, "a", seq, Some(json!(seq))))).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handler.seen().len(), 5);
    assert!(connection.submitted.lock().unwrap().is_empty(), "readonly must never submit an ack");
}
