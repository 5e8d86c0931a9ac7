//! Reviewer: runs one review cycle per resource class.
//!
//! Reviews for different classes may run in parallel. Reviews for the same
//! class are serialized by a per-class lock so two cycles never plan against
//! the same snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use nodelay_events::ProvisioningEvent;
use nodelay_id::ReviewId;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::debounce::ReviewScheduler;
use super::registry::StrategyRegistry;
use super::state::ReviewState;
use crate::metrics::{emit, MetricsSink};
use crate::model::ResourceClass;
use crate::queue::DemandSource;

/// Result of reviewing one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub review_id: ReviewId,
    pub class: ResourceClass,
    pub strategies_run: u32,
    pub strategies_failed: u32,
    pub units_requested: u32,
    /// Demand still uncovered when the chain finished.
    pub unsatisfied_demand: u32,
    pub completed_by: Option<String>,
}

/// Statistics from a periodic pass over every pending class.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReviewStats {
    pub classes_reviewed: u32,
    pub units_requested: u32,
    pub unsatisfied_demand: u32,
}

/// One lock per resource class, created on first use and dropped once no
/// review holds or waits for it.
#[derive(Default)]
struct ClassLocks {
    locks: Mutex<HashMap<ResourceClass, Arc<Mutex<()>>>>,
}

impl ClassLocks {
    async fn get(&self, class: &ResourceClass) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(class.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return a handle obtained from [`get`](Self::get), pruning the entry
    /// when nobody else holds it.
    async fn release(&self, class: &ResourceClass, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(class);
        }
    }

    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Runs the strategy chain against fresh demand.
pub struct Reviewer {
    source: Arc<dyn DemandSource>,
    registry: Arc<StrategyRegistry>,
    scheduler: Arc<ReviewScheduler>,
    locks: ClassLocks,
    metrics: Arc<dyn MetricsSink>,
}

impl Reviewer {
    pub fn new(
        source: Arc<dyn DemandSource>,
        registry: Arc<StrategyRegistry>,
        scheduler: Arc<ReviewScheduler>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            source,
            registry,
            scheduler,
            locks: ClassLocks::default(),
            metrics,
        }
    }

    /// Review a single class.
    ///
    /// Demand is read after the class lock is taken, so the cycle sees every
    /// item that became ready or was cancelled before it started.
    #[instrument(skip_all, fields(class = %class))]
    pub async fn review_class(&self, class: &ResourceClass) -> ReviewOutcome {
        let lock = self.locks.get(class).await;
        let guard = lock.clone().lock_owned().await;
        let outcome = self.review_locked(class).await;
        drop(guard);
        self.locks.release(class, lock).await;
        outcome
    }

    /// Number of classes with a live lock entry.
    pub async fn locked_classes(&self) -> usize {
        self.locks.len().await
    }

    async fn review_locked(&self, class: &ResourceClass) -> ReviewOutcome {
        self.scheduler.begin_review(class);

        let mut state = ReviewState::capture(self.source.as_ref(), [class.clone()]);
        let chain = self.registry.review(&mut state).await;

        if !state.planned().is_empty() {
            self.source.record_pending(state.planned());
        }

        let outcome = ReviewOutcome {
            review_id: state.review_id(),
            class: class.clone(),
            strategies_run: chain.strategies_run,
            strategies_failed: chain.strategies_failed,
            units_requested: state.units_requested(),
            unsatisfied_demand: state.unsatisfied_demand(class),
            completed_by: chain.completed_by,
        };

        if outcome.units_requested > 0 || outcome.unsatisfied_demand > 0 {
            info!(
                review_id = %outcome.review_id,
                strategies_run = outcome.strategies_run,
                strategies_failed = outcome.strategies_failed,
                units_requested = outcome.units_requested,
                unsatisfied_demand = outcome.unsatisfied_demand,
                completed_by = outcome.completed_by.as_deref().unwrap_or("-"),
                "Review complete"
            );
        } else {
            debug!(review_id = %outcome.review_id, "Review complete, nothing to do");
        }

        emit(
            self.metrics.as_ref(),
            ProvisioningEvent::ReviewCompleted {
                review_id: outcome.review_id,
                label: class.to_label(),
                strategies_run: outcome.strategies_run,
                units_requested: outcome.units_requested,
                unsatisfied_demand: outcome.unsatisfied_demand,
                completed_by: outcome.completed_by.clone(),
            },
        );

        outcome
    }

    /// Review every class that currently has buildable work.
    pub async fn review_all(&self) -> ReviewStats {
        let classes = self.source.pending_classes();
        debug!(class_count = classes.len(), "Found classes to review");

        let outcomes = join_all(classes.iter().map(|class| self.review_class(class))).await;

        let mut stats = ReviewStats::default();
        for outcome in outcomes {
            stats.classes_reviewed += 1;
            stats.units_requested = stats.units_requested.saturating_add(outcome.units_requested);
            stats.unsatisfied_demand = stats
                .unsatisfied_demand
                .saturating_add(outcome.unsatisfied_demand);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::AllProviders;
    use crate::limiter::StaticLimiter;
    use crate::metrics::RecordingMetricsSink;
    use crate::model::WorkItem;
    use crate::provider::{CapacityProvider, MockProvider, ProviderRegistry};
    use crate::queue::WorkQueue;
    use crate::scheduler::engine::CapacityDecisionEngine;
    use crate::scheduler::strategy::FallbackStrategy;
    use crate::scheduler::debounce::ReviewRequest;
    use nodelay_events::{event_types, ReviewSource};
    use tokio::sync::mpsc;

    fn linux() -> ResourceClass {
        ResourceClass::label("linux")
    }

    struct Fixture {
        queue: Arc<WorkQueue>,
        provider: Arc<MockProvider>,
        scheduler: Arc<ReviewScheduler>,
        metrics: Arc<RecordingMetricsSink>,
        reviewer: Reviewer,
        _requests: mpsc::Receiver<ReviewRequest>,
    }

    fn fixture(limit: u32) -> Fixture {
        let queue = Arc::new(WorkQueue::new());
        let provider = Arc::new(MockProvider::new(
            "k8s",
            "kubernetes",
            [linux(), ResourceClass::Unlabeled],
        ));
        let providers = Arc::new(ProviderRegistry::new().with(provider.clone()));
        let limiter = StaticLimiter::new()
            .with_ceiling(provider.id(), linux(), limit)
            .with_ceiling(provider.id(), ResourceClass::Unlabeled, limit);
        let metrics = Arc::new(RecordingMetricsSink::new());

        let engine = CapacityDecisionEngine::new(
            providers,
            Arc::new(AllProviders),
            Arc::new(limiter),
            queue.clone(),
            metrics.clone(),
        );
        let registry = StrategyRegistry::new(metrics.clone())
            .with(Arc::new(engine))
            .with(Arc::new(FallbackStrategy));
        let (scheduler, requests) = ReviewScheduler::channel(8, true, metrics.clone());
        let scheduler = Arc::new(scheduler);

        let reviewer = Reviewer::new(
            queue.clone(),
            Arc::new(registry),
            scheduler.clone(),
            metrics.clone(),
        );
        Fixture {
            queue,
            provider,
            scheduler,
            metrics,
            reviewer,
            _requests: requests,
        }
    }

    #[tokio::test]
    async fn test_review_class_plans_and_records_in_flight() {
        let f = fixture(10);
        for _ in 0..3 {
            f.queue.submit_buildable(WorkItem::new(linux()));
        }

        let outcome = f.reviewer.review_class(&linux()).await;

        assert_eq!(outcome.units_requested, 3);
        assert_eq!(outcome.unsatisfied_demand, 0);
        assert_eq!(outcome.completed_by.as_deref(), Some(FallbackStrategy::NAME));
        assert_eq!(f.queue.snapshot(&linux()).in_flight, 3);
        assert_eq!(f.metrics.count(event_types::REVIEW_COMPLETED), 1);
    }

    #[tokio::test]
    async fn test_second_review_sees_in_flight_capacity() {
        let f = fixture(10);
        f.queue.submit_buildable(WorkItem::new(linux()));
        f.queue.submit_buildable(WorkItem::new(linux()));

        f.reviewer.review_class(&linux()).await;
        let second = f.reviewer.review_class(&linux()).await;

        assert_eq!(second.units_requested, 0);
        assert_eq!(f.provider.units_requested(), 2);
    }

    #[tokio::test]
    async fn test_review_clears_pending_flag() {
        let f = fixture(10);
        f.scheduler
            .request_review(&linux(), ReviewSource::FastPath, None);
        assert!(f.scheduler.is_pending(&linux()));

        f.reviewer.review_class(&linux()).await;

        assert!(!f.scheduler.is_pending(&linux()));
    }

    #[tokio::test]
    async fn test_review_all_covers_every_pending_class() {
        let f = fixture(1);
        f.queue.submit_buildable(WorkItem::new(linux()));
        f.queue.submit_buildable(WorkItem::new(linux()));
        f.queue.submit_buildable(WorkItem::unlabeled());

        let stats = f.reviewer.review_all().await;

        assert_eq!(stats.classes_reviewed, 2);
        assert_eq!(stats.units_requested, 2);
        assert_eq!(stats.unsatisfied_demand, 1);
    }

    #[tokio::test]
    async fn test_concurrent_reviews_of_one_class_do_not_overprovision() {
        let f = fixture(10);
        for _ in 0..4 {
            f.queue.submit_buildable(WorkItem::new(linux()));
        }

        // The mock yields inside provision, so the second review runs while
        // the first is still waiting on the provider.
        let class = linux();
        let (a, b) = tokio::join!(
            f.reviewer.review_class(&class),
            f.reviewer.review_class(&class)
        );

        assert_eq!(a.units_requested + b.units_requested, 4);
        assert_eq!(f.provider.units_requested(), 4);
        assert_eq!(f.provider.requests(), vec![(linux(), 4)]);
    }

    #[tokio::test]
    async fn test_idle_class_locks_are_pruned() {
        let f = fixture(10);
        f.queue.submit_buildable(WorkItem::new(linux()));
        f.queue.submit_buildable(WorkItem::unlabeled());

        f.reviewer.review_all().await;
        f.reviewer.review_class(&ResourceClass::label("gpu")).await;

        assert_eq!(f.reviewer.locked_classes().await, 0);
    }
}
