//! Strategy registry: runs the strategy chain for one review.

use std::sync::Arc;

use nodelay_events::ProvisioningEvent;
use tracing::{debug, warn};

use super::state::ReviewState;
use super::strategy::ProvisioningStrategy;
use crate::metrics::{emit, MetricsSink};
use crate::model::ProvisioningDecision;

/// What a pass over the strategy chain did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainOutcome {
    /// Strategies invoked, including failed ones.
    pub strategies_run: u32,

    /// Strategies that returned an error.
    pub strategies_failed: u32,

    /// Strategy that returned `Complete`, if any.
    pub completed_by: Option<String>,
}

/// Ordered provisioning strategies.
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn ProvisioningStrategy>>,
    metrics: Arc<dyn MetricsSink>,
}

impl StrategyRegistry {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            strategies: Vec::new(),
            metrics,
        }
    }

    /// Register a strategy. Strategies with equal ordinals keep registration
    /// order.
    pub fn register(&mut self, strategy: Arc<dyn ProvisioningStrategy>) {
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.ordinal());
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, strategy: Arc<dyn ProvisioningStrategy>) -> Self {
        self.register(strategy);
        self
    }

    /// Strategy names in the order they run.
    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the chain until a strategy returns `Complete`.
    ///
    /// A failing strategy is logged and treated as `Continue`.
    pub async fn review(&self, state: &mut ReviewState) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();

        for strategy in &self.strategies {
            outcome.strategies_run += 1;

            let decision = match strategy.apply(state).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(
                        review_id = %state.review_id(),
                        strategy = %strategy.name(),
                        error = %e,
                        "Strategy failed, consulting remaining strategies"
                    );
                    outcome.strategies_failed += 1;
                    emit(
                        self.metrics.as_ref(),
                        ProvisioningEvent::StrategyFailed {
                            review_id: state.review_id(),
                            strategy: strategy.name().to_string(),
                            reason: e.to_string(),
                        },
                    );
                    ProvisioningDecision::Continue
                }
            };

            debug!(
                review_id = %state.review_id(),
                strategy = %strategy.name(),
                ?decision,
                "Strategy applied"
            );

            if decision.is_complete() {
                outcome.completed_by = Some(strategy.name().to_string());
                break;
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RecordingMetricsSink;
    use crate::scheduler::strategy::{FallbackStrategy, StrategyError};
    use async_trait::async_trait;
    use nodelay_events::event_types;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        name: &'static str,
        ordinal: i32,
        result: fn() -> Result<ProvisioningDecision, StrategyError>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(
            name: &'static str,
            ordinal: i32,
            result: fn() -> Result<ProvisioningDecision, StrategyError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                ordinal,
                result,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProvisioningStrategy for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn ordinal(&self) -> i32 {
            self.ordinal
        }

        async fn apply(&self, _: &mut ReviewState) -> Result<ProvisioningDecision, StrategyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn cont() -> Result<ProvisioningDecision, StrategyError> {
        Ok(ProvisioningDecision::Continue)
    }

    fn complete() -> Result<ProvisioningDecision, StrategyError> {
        Ok(ProvisioningDecision::Complete)
    }

    fn fail() -> Result<ProvisioningDecision, StrategyError> {
        Err(StrategyError::Failed("boom".to_string()))
    }

    #[tokio::test]
    async fn test_runs_in_ordinal_order_and_stops_on_complete() {
        let late = Scripted::new("late", 200, cont);
        let early = Scripted::new("early", 10, complete);
        let registry = StrategyRegistry::new(Arc::new(RecordingMetricsSink::new()))
            .with(late.clone())
            .with(early.clone());

        assert_eq!(registry.names(), vec!["early", "late"]);

        let outcome = registry.review(&mut ReviewState::new()).await;
        assert_eq!(outcome.strategies_run, 1);
        assert_eq!(outcome.completed_by.as_deref(), Some("early"));
        assert_eq!(early.calls(), 1);
        assert_eq!(late.calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_treated_as_continue() {
        let metrics = Arc::new(RecordingMetricsSink::new());
        let broken = Scripted::new("broken", 1, fail);
        let after = Scripted::new("after", 2, cont);
        let registry = StrategyRegistry::new(metrics.clone())
            .with(broken)
            .with(after.clone())
            .with(Arc::new(FallbackStrategy));

        let outcome = registry.review(&mut ReviewState::new()).await;
        assert_eq!(outcome.strategies_run, 3);
        assert_eq!(outcome.strategies_failed, 1);
        assert_eq!(outcome.completed_by.as_deref(), Some(FallbackStrategy::NAME));
        assert_eq!(after.calls(), 1);
        assert_eq!(metrics.count(event_types::STRATEGY_FAILED), 1);
    }

    #[tokio::test]
    async fn test_exhausted_chain_has_no_completer() {
        let registry = StrategyRegistry::new(Arc::new(RecordingMetricsSink::new()))
            .with(Scripted::new("only", 0, cont));

        let outcome = registry.review(&mut ReviewState::new()).await;
        assert_eq!(outcome.strategies_run, 1);
        assert_eq!(outcome.completed_by, None);
    }
}
