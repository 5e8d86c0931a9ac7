//! Event payloads emitted by the provisioner.

use nodelay_id::{PlannedCapacityId, ProviderId, ReviewId, WorkItemId};
use serde::{Deserialize, Serialize};

// =============================================================================
// Event Type Constants
// =============================================================================

/// All event type names as constants.
pub mod event_types {
    // Review
    pub const REVIEW_REQUESTED: &str = "review.requested";
    pub const REVIEW_COALESCED: &str = "review.coalesced";
    pub const REVIEW_COMPLETED: &str = "review.completed";

    // Provisioning
    pub const PROVISION_REQUESTED: &str = "provision.requested";
    pub const PROVISION_FAILED: &str = "provision.failed";

    // Strategy
    pub const STRATEGY_FAILED: &str = "strategy.failed";
}

/// What asked for a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewSource {
    /// A work item became ready and the fast path fired.
    FastPath,
    /// The periodic review timer.
    Periodic,
}

impl std::fmt::Display for ReviewSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewSource::FastPath => write!(f, "fast_path"),
            ReviewSource::Periodic => write!(f, "periodic"),
        }
    }
}

/// A provisioning event.
///
/// `label` is the resource class label; `None` is the unlabeled class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProvisioningEvent {
    /// A review was queued for a resource class.
    ReviewRequested {
        label: Option<String>,
        source: ReviewSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        work_item_id: Option<WorkItemId>,
    },

    /// A review request was dropped because one is already pending.
    ReviewCoalesced { label: Option<String> },

    /// A review cycle finished.
    ReviewCompleted {
        review_id: ReviewId,
        label: Option<String>,
        strategies_run: u32,
        units_requested: u32,
        unsatisfied_demand: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        completed_by: Option<String>,
    },

    /// A provider accepted a provisioning request.
    ProvisionRequested {
        review_id: ReviewId,
        provider_id: ProviderId,
        label: Option<String>,
        units: u32,
        planned: Vec<PlannedCapacityId>,
    },

    /// A provider failed to answer or rejected a provisioning request.
    ProvisionFailed {
        review_id: ReviewId,
        provider_id: ProviderId,
        label: Option<String>,
        reason: String,
    },

    /// A strategy returned an error; the chain continued without it.
    StrategyFailed {
        review_id: ReviewId,
        strategy: String,
        reason: String,
    },
}

impl ProvisioningEvent {
    /// The dotted event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            ProvisioningEvent::ReviewRequested { .. } => event_types::REVIEW_REQUESTED,
            ProvisioningEvent::ReviewCoalesced { .. } => event_types::REVIEW_COALESCED,
            ProvisioningEvent::ReviewCompleted { .. } => event_types::REVIEW_COMPLETED,
            ProvisioningEvent::ProvisionRequested { .. } => event_types::PROVISION_REQUESTED,
            ProvisioningEvent::ProvisionFailed { .. } => event_types::PROVISION_FAILED,
            ProvisioningEvent::StrategyFailed { .. } => event_types::STRATEGY_FAILED,
        }
    }

    /// The review this event belongs to, if any.
    pub fn review_id(&self) -> Option<ReviewId> {
        match self {
            ProvisioningEvent::ReviewCompleted { review_id, .. }
            | ProvisioningEvent::ProvisionRequested { review_id, .. }
            | ProvisioningEvent::ProvisionFailed { review_id, .. }
            | ProvisioningEvent::StrategyFailed { review_id, .. } => Some(*review_id),
            ProvisioningEvent::ReviewRequested { .. }
            | ProvisioningEvent::ReviewCoalesced { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_source_serialization() {
        assert_eq!(
            serde_json::to_string(&ReviewSource::FastPath).unwrap(),
            "\"fast_path\""
        );
        assert_eq!(ReviewSource::Periodic.to_string(), "periodic");
    }

    #[test]
    fn test_event_is_internally_tagged() {
        let event = ProvisioningEvent::ReviewCoalesced {
            label: Some("linux".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "review_coalesced");
        assert_eq!(json["label"], "linux");
    }

    #[test]
    fn test_event_type_names() {
        let review_id = ReviewId::new();
        let event = ProvisioningEvent::StrategyFailed {
            review_id,
            strategy: "no-delay".to_string(),
            reason: "boom".to_string(),
        };
        assert_eq!(event.event_type(), "strategy.failed");
        assert_eq!(event.review_id(), Some(review_id));

        let event = ProvisioningEvent::ReviewRequested {
            label: None,
            source: ReviewSource::Periodic,
            work_item_id: None,
        };
        assert_eq!(event.event_type(), "review.requested");
        assert_eq!(event.review_id(), None);
    }
}
