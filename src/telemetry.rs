//! A sink for events spec.md calls out as "telemetry" without naming a
//! backend (duplicate-message drops, re-entrant gap-fill fetches). The
//! manager never picks a concrete sink itself — callers inject one, or accept the no-op default.

/// One telemetry-worthy event raised by the manager during ordering or
/// gap-fill.
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// An inbound message at or below the last-queued sequence number was
    /// dropped as a duplicate.
    DuplicateMessage {
        /// The duplicate's sequence number.
        sequence_number: u64,
    },
    /// `trigger_fetch_missing_deltas` was asked to start a gap-fill fetch
    /// while one was already in flight, and skipped.
    GapFillAlreadyInFlight {
        /// The reason the caller gave for requesting the fetch.
        reason: &'static str,
    },
}

/// Receives [`TelemetryEvent`]s. Implementations decide where they go
/// (logs, a metrics backend, nowhere).
pub trait TelemetrySink: Send + Sync {
    /// Record one event.
    fn record(&self, event: TelemetryEvent);
}

/// The default sink: discards everything. Used when a caller doesn't
/// inject one of its own.
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn record(&self, _event: TelemetryEvent) {}
}
