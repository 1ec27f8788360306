//! Wire data model shared between the connection, storage, manager and
//! handler collaborators.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Client identifier. Scoped to one connection generation; a new value is
/// assigned whenever `attachOpHandler`/`connect` establishes a session
/// (the connection collaborator hands it back via `ConnectionDetails`).
pub type ClientId = String;

/// Opaque application payload. The manager never interprets this — only
/// the handler strategy does.
pub type Opaque = serde_json::Value;

/// Generate a fresh client id for a new connection generation.
pub fn new_client_id() -> ClientId {
    uuid::Uuid::new_v4().to_string()
}

/// Message type taxonomy. Not exhaustive — unrecognized system
/// control messages round-trip through [`MessageType::System`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// A real operation against document state.
    Operation,
    /// A proposal that the server must ack immediately.
    Propose,
    /// A no-op, used only to advance the reference sequence number.
    NoOp,
    /// A client joining the session.
    ClientJoin,
    /// A client leaving the session.
    ClientLeave,
    /// Any other system-type message, keyed by its wire type name.
    System(String),
}

impl MessageType {
    /// Whether this type is shaped on construction by promoting `contents`
    /// to a top-level `data` field. `Operation` and
    /// `Propose` carry real op content and are never system types;
    /// everything else is.
    pub fn is_system_type(&self) -> bool {
        !matches!(self, MessageType::Operation | MessageType::Propose)
    }

    /// Whether processing a message of this type schedules a
    /// reference-sequence-number ack.
    pub fn requires_ack(&self) -> bool {
        matches!(self, MessageType::Operation | MessageType::Propose)
    }

    /// Whether a string `contents` payload should be JSON-decoded before
    /// delivery to the handler. Kept as a single named predicate so
    /// broadening the exemption later, once the server contract is
    /// confirmed, is a one-line change.
    pub fn decodes_string_contents(&self) -> bool {
        !matches!(self, MessageType::ClientLeave)
    }
}

/// `{action, service, timestamp}` appended at submit time and at
/// successful processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// "start" or "end"
    pub action: String,
    /// The service that stamped this trace (the manager's `client_type`)
    pub service: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl Trace {
    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as u64
    }

    /// Stamp a "start" trace for `service`, at submit time.
    pub fn start(service: impl Into<String>) -> Self {
        Self {
            action: "start".to_string(),
            service: service.into(),
            timestamp: Self::now_ms(),
        }
    }

    /// Stamp an "end" trace for `service`, after successful processing.
    pub fn end(service: impl Into<String>) -> Self {
        Self {
            action: "end".to_string(),
            service: service.into(),
            timestamp: Self::now_ms(),
        }
    }
}

/// An outbound message prior to server sequencing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMessage {
    /// Monotonically increasing per-connection counter (`submit` assigns it)
    pub client_sequence_number: u64,
    /// `baseSequenceNumber` known to the client at submit time
    pub reference_sequence_number: u64,
    /// The message's type
    pub message_type: MessageType,
    /// Opaque payload, `None` once promoted to `data` (system types) or
    /// once stripped out for the split-content protocol
    pub contents: Option<Opaque>,
    /// System-type messages promote `contents` here on construction
    pub data: Option<Opaque>,
    /// Traces accumulated so far
    pub traces: Vec<Trace>,
}

impl DocumentMessage {
    /// Build a new envelope, applying system-type `contents` → `data`
    /// shaping on construction.
    pub fn new(
        client_sequence_number: u64,
        reference_sequence_number: u64,
        message_type: MessageType,
        contents: Option<Opaque>,
    ) -> Self {
        let is_system = message_type.is_system_type();
        Self {
            client_sequence_number,
            reference_sequence_number,
            data: if is_system { contents.clone() } else { None },
            contents: if is_system { None } else { contents },
            message_type,
            traces: Vec::new(),
        }
    }
}

/// A server-sequenced message, as delivered on the inbound `op` stream.
/// `sequence_number` is globally monotone per document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencedMessage {
    /// Server-assigned, globally monotone sequence number
    pub sequence_number: u64,
    /// The server's minimum sequence number as of this message
    pub minimum_sequence_number: u64,
    /// The client that submitted this message
    pub client_id: ClientId,
    /// That client's local sequence number for this message
    pub client_sequence_number: u64,
    /// The `baseSequenceNumber` the submitting client knew about
    pub reference_sequence_number: u64,
    /// The message's type
    pub message_type: MessageType,
    /// Opaque payload; `None` when the server split it onto the
    /// `op-content` channel (reassembled before delivery)
    pub contents: Option<Opaque>,
    /// Traces accumulated so far
    pub traces: Vec<Trace>,
}

/// The content half of a split outbound message, matched to its envelope
/// by `(client_id, client_sequence_number)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentMessage {
    /// The client that submitted the originating envelope
    pub client_id: ClientId,
    /// That client's local sequence number for the envelope
    pub client_sequence_number: u64,
    /// The payload that was split out of the envelope
    pub contents: Opaque,
}

/// An opaque signal payload, parsed once before delivery to the handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// The signal's (already-parsed) content
    pub content: Opaque,
}
