//! Error types and handling for the delta manager
//!
//! Fatal invariant violations (order violation, content-fetch mismatch) are
//! not represented here — they are assertions, not recoverable errors, and
//! are raised with `assert!`/`panic!` at their call sites.

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the delta manager
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// The connection collaborator reported a failure
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The delta storage collaborator reported a failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The handler strategy collaborator reported a failure
    #[error("handler error: {0}")]
    Handler(Box<dyn std::error::Error + Send + Sync>),

    /// An inbound or outbound message failed to decode
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Operation attempted after `close()`
    #[error("delta manager is closed")]
    Closed,

    /// A queue worker reported an error; the queue halts but is not cleared
    #[error("queue error: {0}")]
    Queue(String),
}

/// Connection/transport errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Connection failed or was lost
    #[error("connection lost: {0}")]
    Lost(String),

    /// Server-initiated NACK of the client's outbound stream
    #[error("nacked by server: {0}")]
    Nacked(String),

    /// connect() failed outright (e.g. auth, unreachable)
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// submitAsync/submit rejected by the connection
    #[error("submit rejected: {0}")]
    SubmitRejected(String),
}

/// Delta storage (historical op range) errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// The storage backend returned an error for `get(from, to)`
    #[error("delta storage fetch failed: {0}")]
    FetchFailed(String),

    /// Resolving the delta storage client itself failed (during connect)
    #[error("failed to resolve delta storage: {0}")]
    ResolveFailed(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid-message error
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    /// Wrap a handler-strategy error
    pub fn handler(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Handler(Box::new(err))
    }

    /// Create a queue-worker error
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    /// Whether this error is expected to clear on its own with a retry
    /// (transport loss, storage fetch failure). These are logged and
    /// retried by the reconnect/backoff policy, never propagated as
    /// fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(ConnectionError::Lost(_))
                | Error::Connection(ConnectionError::Nacked(_))
                | Error::Storage(StorageError::FetchFailed(_))
        )
    }

    /// Whether this error should halt the owning queue rather than retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Handler(_) | Error::InvalidMessage(_))
    }
}
