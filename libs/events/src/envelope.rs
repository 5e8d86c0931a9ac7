//! Event envelope - the common wrapper for provisioning events.

use chrono::{DateTime, Utc};
use nodelay_id::ReviewId;
use serde::{Deserialize, Serialize};

use crate::{EventError, ProvisioningEvent};

/// Common metadata around a [`ProvisioningEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    /// The event type (e.g., "review.requested").
    pub event_type: String,

    /// Review cycle the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_id: Option<ReviewId>,

    /// Event-specific payload.
    pub payload: ProvisioningEvent,
}

impl EventEnvelope {
    /// Wraps an event, stamping it with the current time.
    pub fn new(payload: ProvisioningEvent) -> Self {
        Self::at(payload, Utc::now())
    }

    /// Wraps an event with an explicit timestamp.
    pub fn at(payload: ProvisioningEvent, occurred_at: DateTime<Utc>) -> Self {
        Self {
            occurred_at,
            event_type: payload.event_type().to_string(),
            review_id: payload.review_id(),
            payload,
        }
    }

    /// Serializes the envelope as a single JSON line.
    pub fn to_json(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }
}
