//! A client-side delta manager for an operational-transform collaboration
//! service: orders inbound ops, gap-fills from delta storage, reassembles
//! split content, throttles reference-sequence-number acks, and drives a
//! reconnecting connection state machine.
#![warn(missing_docs)]

/// Error, configuration, and wire data model shared by every collaborator.
pub mod core;
/// Typed publish/subscribe primitive used by the queue, cache, and manager.
pub mod events;
/// The paused-by-default async FIFO backing the manager's three streams.
pub mod queue;
/// The bounded per-client cache resolving split-content reassembly.
pub mod cache;
/// The connection collaborator contract and its event stream.
pub mod connection;
/// The delta-storage collaborator contract and the gap-fill fetch loop.
pub mod storage;
/// The handler-strategy collaborator contract.
pub mod handler;
/// `DeltaManager`, the orchestrator tying every collaborator together.
pub mod manager;
/// The telemetry sink hook for duplicate-message and gap-fill events.
pub mod telemetry;

pub use core::{DeltaManagerConfig, Error, Result};
pub use manager::{ClientType, DeltaManager, ManagerEvent};
pub use telemetry::{NoopTelemetrySink, TelemetryEvent, TelemetrySink};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize process-wide tracing. Call once at process startup before
/// constructing a [`DeltaManager`].
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("initializing {} v{}", NAME, VERSION);
    Ok(())
}
