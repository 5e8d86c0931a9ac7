//! Capacity decision engine: the no-delay provisioning strategy.
//!
//! For every class in the review it compares demand with available plus
//! in-flight capacity and asks eligible providers for the difference, right
//! away, instead of waiting for load statistics to build up.
//!
//! Providers are visited in registration order and the engine stops once the
//! class is covered (first fit, not load balanced). For each provider:
//! - The filter and the provider's own headroom check must both pass
//! - A failing headroom check makes the provider ineligible for this review
//! - A failing limiter means zero remaining limit
//! - The request is `min(shortfall, remaining limit)` units
//!
//! The engine always answers `Continue`; terminating the chain is the
//! fallback strategy's job. A cycle that leaves demand uncovered is not
//! retried in place: the next trigger or periodic review picks it up.

use std::sync::Arc;

use async_trait::async_trait;
use nodelay_capacity::grant;
use nodelay_events::ProvisioningEvent;
use tracing::{debug, info, warn};

use super::state::ReviewState;
use super::strategy::{ProvisioningStrategy, StrategyError};
use crate::filter::ProviderFilter;
use crate::limiter::CapacityLimiter;
use crate::metrics::{emit, MetricsSink};
use crate::model::{ProvisioningDecision, ResourceClass};
use crate::provider::{CapacityProvider, ProviderRegistry};
use crate::tracker::QueueItemTracker;

/// Default position of the engine in the strategy chain.
pub const DEFAULT_ORDINAL: i32 = 100;

/// Immediate, capacity-aware provisioning strategy.
pub struct CapacityDecisionEngine {
    name: String,
    ordinal: i32,
    enabled: bool,
    providers: Arc<ProviderRegistry>,
    filter: Arc<dyn ProviderFilter>,
    limiter: Arc<dyn CapacityLimiter>,
    tracker: Arc<dyn QueueItemTracker>,
    metrics: Arc<dyn MetricsSink>,
}

impl CapacityDecisionEngine {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        filter: Arc<dyn ProviderFilter>,
        limiter: Arc<dyn CapacityLimiter>,
        tracker: Arc<dyn QueueItemTracker>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            name: "no-delay".to_string(),
            ordinal: DEFAULT_ORDINAL,
            enabled: true,
            providers,
            filter,
            limiter,
            tracker,
            metrics,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_ordinal(mut self, ordinal: i32) -> Self {
        self.ordinal = ordinal;
        self
    }

    /// Disabled engines plan nothing and always answer `Continue`.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether a provider may be asked for capacity for `class` in this review.
    fn is_eligible(
        &self,
        provider: &dyn CapacityProvider,
        class: &ResourceClass,
        state: &ReviewState,
    ) -> bool {
        if !provider.supports(class) || !self.filter.should_process_provider(provider, class) {
            return false;
        }

        match provider.can_provision(class, state.planned_for(provider.id())) {
            Ok(eligible) => eligible,
            Err(e) => {
                warn!(
                    review_id = %state.review_id(),
                    provider = %provider.name(),
                    class = %class,
                    error = %e,
                    "Provider query failed, skipping provider for this review"
                );
                false
            }
        }
    }

    /// Remaining limit for a provider, failing closed.
    fn remaining_limit(
        &self,
        provider: &dyn CapacityProvider,
        class: &ResourceClass,
        state: &mut ReviewState,
    ) -> u32 {
        let review_id = state.review_id();
        state.remaining_limit(provider.id(), class, || {
            match self.limiter.remaining_limit(provider.id(), class) {
                Ok(remaining) => remaining,
                Err(e) => {
                    warn!(
                        review_id = %review_id,
                        provider = %provider.name(),
                        class = %class,
                        error = %e,
                        "Limit lookup failed, treating as no remaining capacity"
                    );
                    0
                }
            }
        })
    }

    /// Plan capacity for one class, first fit across providers.
    async fn provision_class(&self, class: &ResourceClass, state: &mut ReviewState) {
        for provider in self.providers.iter() {
            let shortfall = state.unsatisfied_demand(class);
            if shortfall == 0 {
                break;
            }

            if !self.is_eligible(provider.as_ref(), class, state) {
                continue;
            }

            let remaining = self.remaining_limit(provider.as_ref(), class, state);
            let units = grant(shortfall, remaining);
            if units == 0 {
                debug!(
                    review_id = %state.review_id(),
                    provider = %provider.name(),
                    class = %class,
                    shortfall,
                    "Provider at its limit"
                );
                continue;
            }

            match provider.provision(class, units).await {
                Ok(planned) => {
                    let planned_units = planned.iter().map(|p| p.units).fold(0, u32::saturating_add);
                    if planned_units == 0 {
                        debug!(
                            review_id = %state.review_id(),
                            provider = %provider.name(),
                            class = %class,
                            units,
                            "Provider accepted request but planned nothing"
                        );
                        continue;
                    }

                    for p in &planned {
                        if let Err(e) = self.limiter.register(p) {
                            warn!(planned_capacity_id = %p.id, error = %e, "Failed to register planned capacity with limiter");
                        }
                    }

                    let planned_ids: Vec<_> = planned.iter().map(|p| p.id).collect();
                    let links = state.record_planned(class, provider.id(), planned);
                    for (item, planned_id) in links {
                        if let Err(e) = self.tracker.track(item, planned_id) {
                            warn!(work_item_id = %item, planned_capacity_id = %planned_id, error = %e, "Failed to track work item");
                        }
                    }

                    info!(
                        review_id = %state.review_id(),
                        provider = %provider.name(),
                        class = %class,
                        units = planned_units,
                        requested = units,
                        remaining_demand = state.unsatisfied_demand(class),
                        "Requested capacity"
                    );
                    emit(
                        self.metrics.as_ref(),
                        ProvisioningEvent::ProvisionRequested {
                            review_id: state.review_id(),
                            provider_id: provider.id(),
                            label: class.to_label(),
                            units: planned_units,
                            planned: planned_ids,
                        },
                    );
                }
                Err(e) => {
                    warn!(
                        review_id = %state.review_id(),
                        provider = %provider.name(),
                        class = %class,
                        units,
                        error = %e,
                        "Provisioning request failed"
                    );
                    emit(
                        self.metrics.as_ref(),
                        ProvisioningEvent::ProvisionFailed {
                            review_id: state.review_id(),
                            provider_id: provider.id(),
                            label: class.to_label(),
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
    }
}

#[async_trait]
impl ProvisioningStrategy for CapacityDecisionEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn ordinal(&self) -> i32 {
        self.ordinal
    }

    async fn apply(&self, state: &mut ReviewState) -> Result<ProvisioningDecision, StrategyError> {
        if !self.enabled {
            debug!(strategy = %self.name, "Provisioning not complete, strategy is disabled");
            return Ok(ProvisioningDecision::Continue);
        }

        let classes: Vec<ResourceClass> = state.classes().cloned().collect();
        for class in &classes {
            if state.unsatisfied_demand(class) == 0 {
                continue;
            }
            self.provision_class(class, state).await;
        }

        Ok(ProvisioningDecision::Continue)
    }
}
