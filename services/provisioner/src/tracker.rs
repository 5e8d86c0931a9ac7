//! Queue item tracking.
//!
//! Links a work item to the planned capacity requested for it. The engine
//! calls the tracker only after a provider accepted the request. Tracker
//! failures are logged and ignored.

use nodelay_id::{PlannedCapacityId, WorkItemId};
use thiserror::Error;

/// Errors returned by a tracker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// The work item is no longer queued.
    #[error("work item {0} is not queued")]
    UnknownItem(WorkItemId),

    /// The work item is already linked to other in-flight capacity.
    #[error("work item {item} already linked to {existing}")]
    AlreadyLinked {
        item: WorkItemId,
        existing: PlannedCapacityId,
    },
}

/// Bookkeeping between demand and provisioned capacity.
pub trait QueueItemTracker: Send + Sync {
    fn track(&self, item: WorkItemId, planned: PlannedCapacityId) -> Result<(), TrackerError>;
}
