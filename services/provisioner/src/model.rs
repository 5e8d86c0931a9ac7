//! Core data model: work items, resource classes, planned capacity and
//! strategy decisions.

use chrono::{DateTime, Utc};
use nodelay_id::{PlannedCapacityId, ProviderId, WorkItemId};
use serde::{Deserialize, Serialize};

/// Tag constraining which providers can satisfy a work item.
///
/// Work without a label belongs to [`ResourceClass::Unlabeled`], which is
/// reviewed on its own like any other class.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    Unlabeled,
    Label(String),
}

impl ResourceClass {
    /// A labelled class.
    pub fn label(name: impl Into<String>) -> Self {
        ResourceClass::Label(name.into())
    }

    /// Map an optional label to a class.
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some(name) => ResourceClass::Label(name.to_string()),
            None => ResourceClass::Unlabeled,
        }
    }

    /// The label, or `None` for unlabeled work.
    pub fn as_label(&self) -> Option<&str> {
        match self {
            ResourceClass::Unlabeled => None,
            ResourceClass::Label(name) => Some(name),
        }
    }

    /// Owned label for event payloads.
    pub fn to_label(&self) -> Option<String> {
        self.as_label().map(str::to_string)
    }
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceClass::Unlabeled => write!(f, "<unlabeled>"),
            ResourceClass::Label(name) => write!(f, "{}", name),
        }
    }
}

/// A unit of pending work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub class: ResourceClass,
    pub enqueued_at: DateTime<Utc>,
}

impl WorkItem {
    /// Create a work item enqueued now.
    pub fn new(class: ResourceClass) -> Self {
        Self {
            id: WorkItemId::new(),
            class,
            enqueued_at: Utc::now(),
        }
    }

    /// Create a work item with no label requirement.
    pub fn unlabeled() -> Self {
        Self::new(ResourceClass::Unlabeled)
    }
}

/// A pending work item as seen by a review, with the planned capacity it is
/// already linked to, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingItem {
    pub item: WorkItem,
    pub planned: Option<PlannedCapacityId>,
}

impl PendingItem {
    pub fn unlinked(item: WorkItem) -> Self {
        Self {
            item,
            planned: None,
        }
    }
}

/// Capacity a provider accepted a request for.
///
/// Creation completes asynchronously; nothing in a review waits for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedCapacity {
    pub id: PlannedCapacityId,
    pub provider_id: ProviderId,
    pub class: ResourceClass,
    /// Work items this capacity can run once online.
    pub units: u32,
}

impl PlannedCapacity {
    pub fn new(provider_id: ProviderId, class: ResourceClass, units: u32) -> Self {
        Self {
            id: PlannedCapacityId::new(),
            provider_id,
            class,
            units,
        }
    }
}

/// Result of one strategy invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvisioningDecision {
    /// Let the remaining strategies run.
    #[default]
    Continue,

    /// Stop the chain for this review.
    Complete,
}

impl ProvisioningDecision {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Queue state for one resource class at the moment a review starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassSnapshot {
    /// Buildable items, oldest first.
    pub items: Vec<PendingItem>,

    /// Idle capacity that can take work right now.
    pub available: u32,

    /// Requested capacity that has not come online.
    pub in_flight: u32,
}
