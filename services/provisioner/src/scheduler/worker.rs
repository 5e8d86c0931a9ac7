//! Review background worker.
//!
//! Drains fast-path review requests as they arrive and runs a periodic review
//! of every pending class on a fixed interval. Each review runs in its own
//! task; the reviewer's class locks keep same-class reviews in order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

use super::debounce::ReviewRequest;
use super::review::Reviewer;

/// Worker that owns the review request receiver.
pub struct ReviewWorker {
    reviewer: Arc<Reviewer>,
    requests: mpsc::Receiver<ReviewRequest>,
    interval: Duration,
}

impl ReviewWorker {
    pub fn new(
        reviewer: Arc<Reviewer>,
        requests: mpsc::Receiver<ReviewRequest>,
        interval: Duration,
    ) -> Self {
        Self {
            reviewer,
            requests,
            interval,
        }
    }

    /// Run until shutdown is signaled, then wait for in-progress reviews.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting review worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately.
        interval.tick().await;

        let mut tasks = JoinSet::new();
        let mut requests_open = true;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let reviewer = self.reviewer.clone();
                    tasks.spawn(async move {
                        let stats = reviewer.review_all().await;
                        if stats.classes_reviewed > 0 {
                            info!(
                                classes_reviewed = stats.classes_reviewed,
                                units_requested = stats.units_requested,
                                unsatisfied_demand = stats.unsatisfied_demand,
                                "Periodic review complete"
                            );
                        }
                    });
                }
                request = self.requests.recv(), if requests_open => {
                    match request {
                        Some(request) => {
                            debug!(class = %request.class, source = %request.source, "Dispatching review");
                            let reviewer = self.reviewer.clone();
                            tasks.spawn(async move {
                                reviewer.review_class(&request.class).await;
                            });
                        }
                        None => {
                            info!("Review request channel closed, continuing with periodic reviews");
                            requests_open = false;
                        }
                    }
                }
                Some(result) = tasks.join_next() => {
                    if let Err(e) = result {
                        error!(error = %e, "Review task failed");
                    }
                }
                changed = shutdown.changed() => {
                    match changed {
                        Ok(()) if !*shutdown.borrow() => {}
                        Ok(()) => {
                            info!("Review worker shutting down");
                            break;
                        }
                        Err(_) => {
                            info!("Shutdown sender dropped, review worker stopping");
                            break;
                        }
                    }
                }
            }
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Review task failed");
            }
        }
    }
}
