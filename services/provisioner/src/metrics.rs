//! Metrics sinks.
//!
//! Fire-and-forget observability hook. A sink that fails is logged and
//! otherwise ignored; it never changes a provisioning decision.

use std::sync::{Mutex, PoisonError};

use nodelay_events::{EventEnvelope, ProvisioningEvent};
use thiserror::Error;
use tracing::{info, warn};

/// Errors returned by a metrics sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("metrics sink unavailable: {0}")]
    Unavailable(String),
}

/// Receiver for provisioning events.
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: ProvisioningEvent) -> Result<(), SinkError>;
}

/// Record an event, logging and dropping any sink failure.
pub(crate) fn emit(sink: &dyn MetricsSink, event: ProvisioningEvent) {
    let event_type = event.event_type();
    if let Err(e) = sink.record(event) {
        warn!(event_type, error = %e, "Failed to record provisioning event");
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _: ProvisioningEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink that writes each event as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, event: ProvisioningEvent) -> Result<(), SinkError> {
        let envelope = EventEnvelope::new(event);
        let json = envelope
            .to_json()
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        info!(event_type = %envelope.event_type, event = %json, "Provisioning event");
        Ok(())
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingMetricsSink {
    events: Mutex<Vec<EventEnvelope>>,
}

impl RecordingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first.
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded events with the given type name.
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn record(&self, event: ProvisioningEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EventEnvelope::new(event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodelay_events::event_types;

    struct BrokenSink;

    impl MetricsSink for BrokenSink {
        fn record(&self, _: ProvisioningEvent) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("down".to_string()))
        }
    }

    #[test]
    fn test_recording_sink_counts_by_type() {
        let sink = RecordingMetricsSink::new();
        emit(&sink, ProvisioningEvent::ReviewCoalesced { label: None });
        emit(&sink, ProvisioningEvent::ReviewCoalesced { label: None });

        assert_eq!(sink.count(event_types::REVIEW_COALESCED), 2);
        assert_eq!(sink.count(event_types::REVIEW_REQUESTED), 0);
        assert_eq!(sink.events().len(), 2);
    }

    #[test]
    fn test_emit_swallows_sink_errors() {
        // Must not panic or propagate
        emit(&BrokenSink, ProvisioningEvent::ReviewCoalesced { label: None });
    }
}
