//! Review trigger: the fast path.
//!
//! Called when a work item becomes buildable. It only decides whether an
//! out-of-band review is worth asking for; the review itself runs on the
//! worker. Nothing here blocks or provisions.

use std::sync::Arc;

use nodelay_events::ReviewSource;
use tracing::{debug, warn};

use super::debounce::{RequestOutcome, ReviewScheduler};
use crate::filter::ProviderFilter;
use crate::model::WorkItem;
use crate::provider::ProviderRegistry;
use crate::queue::QueueListener;

/// Result of [`ReviewTrigger::on_work_item_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Fast provisioning is turned off.
    Disabled,
    /// No provider serves the class, passes the filter, and has headroom.
    NoEligibleProvider,
    /// A review was requested from the scheduler.
    Requested(RequestOutcome),
}

/// Requests an immediate review when work becomes ready.
pub struct ReviewTrigger {
    enabled: bool,
    providers: Arc<ProviderRegistry>,
    filter: Arc<dyn ProviderFilter>,
    scheduler: Arc<ReviewScheduler>,
}

impl ReviewTrigger {
    pub fn new(
        enabled: bool,
        providers: Arc<ProviderRegistry>,
        filter: Arc<dyn ProviderFilter>,
        scheduler: Arc<ReviewScheduler>,
    ) -> Self {
        Self {
            enabled,
            providers,
            filter,
            scheduler,
        }
    }

    /// React to a work item entering the buildable state.
    ///
    /// One eligible provider is enough: further requests for the same class
    /// would be coalesced by the scheduler anyway.
    pub fn on_work_item_ready(&self, item: &WorkItem) -> TriggerOutcome {
        if !self.enabled {
            return TriggerOutcome::Disabled;
        }

        let class = &item.class;
        for provider in self.providers.iter() {
            if !provider.supports(class)
                || !self.filter.should_process_provider(provider.as_ref(), class)
            {
                continue;
            }

            match provider.can_provision(class, 0) {
                Ok(true) => {
                    let outcome =
                        self.scheduler
                            .request_review(class, ReviewSource::FastPath, Some(item.id));
                    debug!(
                        work_item_id = %item.id,
                        class = %class,
                        provider = %provider.name(),
                        ?outcome,
                        "Fast path review"
                    );
                    return TriggerOutcome::Requested(outcome);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        work_item_id = %item.id,
                        provider = %provider.name(),
                        class = %class,
                        error = %e,
                        "Provider query failed, skipping provider"
                    );
                }
            }
        }

        debug!(work_item_id = %item.id, class = %class, "No eligible provider for fast path");
        TriggerOutcome::NoEligibleProvider
    }
}

impl QueueListener for ReviewTrigger {
    fn on_enter_buildable(&self, item: &WorkItem) {
        self.on_work_item_ready(item);
    }
}
