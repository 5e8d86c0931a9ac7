//! Review scheduler: debounced hand-off of review requests to the worker.
//!
//! Each resource class carries a "review already pending" flag. The first
//! request for a class queues a review and sets the flag; further requests are
//! coalesced until the review for that class actually starts. A trigger that
//! arrives while a review is running therefore schedules exactly one
//! follow-up review.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nodelay_capacity::PendingSet;
use nodelay_events::{ProvisioningEvent, ReviewSource};
use nodelay_id::WorkItemId;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::metrics::{emit, MetricsSink};
use crate::model::ResourceClass;

/// A queued review for one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    pub class: ResourceClass,
    pub source: ReviewSource,
}

/// Result of [`ReviewScheduler::request_review`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A new review was queued.
    Queued,
    /// A review for the class was already pending.
    Coalesced,
    /// Fast-path reviews are disabled.
    Disabled,
    /// The worker queue was full or closed; the periodic review will catch up.
    Dropped,
}

/// Debounced sender of review requests.
pub struct ReviewScheduler {
    sender: mpsc::Sender<ReviewRequest>,
    pending: Mutex<PendingSet<ResourceClass>>,
    fast_path_enabled: bool,
    metrics: Arc<dyn MetricsSink>,
}

impl ReviewScheduler {
    /// Create a scheduler and the receiver the review worker drains.
    pub fn channel(
        capacity: usize,
        fast_path_enabled: bool,
        metrics: Arc<dyn MetricsSink>,
    ) -> (Self, mpsc::Receiver<ReviewRequest>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let scheduler = Self {
            sender,
            pending: Mutex::new(PendingSet::new()),
            fast_path_enabled,
            metrics,
        };
        (scheduler, receiver)
    }

    fn pending(&self) -> MutexGuard<'_, PendingSet<ResourceClass>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fast_path_enabled(&self) -> bool {
        self.fast_path_enabled
    }

    /// Request a review for `class`. Never blocks.
    pub fn request_review(
        &self,
        class: &ResourceClass,
        source: ReviewSource,
        work_item: Option<WorkItemId>,
    ) -> RequestOutcome {
        if source == ReviewSource::FastPath && !self.fast_path_enabled {
            return RequestOutcome::Disabled;
        }

        if !self.pending().mark(class.clone()) {
            debug!(class = %class, %source, "Review already pending, coalescing");
            emit(
                self.metrics.as_ref(),
                ProvisioningEvent::ReviewCoalesced {
                    label: class.to_label(),
                },
            );
            return RequestOutcome::Coalesced;
        }

        let request = ReviewRequest {
            class: class.clone(),
            source,
        };
        match self.sender.try_send(request) {
            Ok(()) => {
                debug!(class = %class, %source, "Review requested");
                emit(
                    self.metrics.as_ref(),
                    ProvisioningEvent::ReviewRequested {
                        label: class.to_label(),
                        source,
                        work_item_id: work_item,
                    },
                );
                RequestOutcome::Queued
            }
            Err(e) => {
                self.pending().clear(class);
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "review queue full",
                    mpsc::error::TrySendError::Closed(_) => "review worker stopped",
                };
                warn!(class = %class, %source, reason, "Dropping review request");
                RequestOutcome::Dropped
            }
        }
    }

    /// Mark the start of a review for `class`, re-arming its trigger.
    ///
    /// Must be called while holding the class lock.
    pub fn begin_review(&self, class: &ResourceClass) {
        self.pending().clear(class);
    }

    /// Whether a review for `class` is queued but not yet started.
    pub fn is_pending(&self, class: &ResourceClass) -> bool {
        self.pending().is_pending(class)
    }
}
