//! Core foundations shared by every other module: errors, configuration,
//! and the wire data model.

/// Error types and result handling
pub mod error;
/// Configuration management
pub mod config;
/// Wire data model: sequenced/document/content messages, traces, ids
pub mod types;

pub use config::DeltaManagerConfig;
pub use error::{Error, Result};
