//! nodelay provisioner
//!
//! Development host for the provisioning engine. Runs the review worker
//! against in-memory providers from `NODELAY_PROVIDERS` and, when
//! `NODELAY_SIMULATE_ARRIVAL_MS` is set, a load generator that submits work
//! and brings planned capacity online.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use nodelay_provisioner::{
    config::Config,
    filter::{AllProviders, KindFilter, ProviderFilter},
    limiter::{CapacityLimiter, StaticLimiter},
    metrics::{MetricsSink, TracingMetricsSink},
    model::{ResourceClass, WorkItem},
    provider::{CapacityProvider, MockProvider, ProviderRegistry},
    queue::{DemandSource, WorkQueue},
    scheduler::{
        CapacityDecisionEngine, FallbackStrategy, ReviewScheduler, ReviewTrigger, ReviewWorker,
        Reviewer, StrategyRegistry,
    },
};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to NODELAY_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting nodelay provisioner");
    info!(
        fast_provisioning_enabled = config.fast_provisioning_enabled,
        review_interval_secs = config.review_interval.as_secs(),
        providers = config.providers.len(),
        "Configuration loaded"
    );

    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetricsSink);

    // Providers and their ceilings
    let mut registry = ProviderRegistry::new();
    let mut limits = StaticLimiter::new();
    for spec in &config.providers {
        let provider = MockProvider::new(&spec.name, &spec.kind, spec.classes.iter().cloned());
        for class in &spec.classes {
            limits = limits.with_ceiling(provider.id(), class.clone(), spec.limit.unwrap_or(u32::MAX));
        }
        registry.register(Arc::new(provider));
    }
    let providers = Arc::new(registry);
    let limiter = Arc::new(limits);

    let filter: Arc<dyn ProviderFilter> = match &config.strategy_kind {
        Some(kind) => Arc::new(KindFilter::new(kind.clone())),
        None => Arc::new(AllProviders),
    };

    // Fast path: queue -> trigger -> scheduler
    let (scheduler, requests) = ReviewScheduler::channel(
        config.review_queue_capacity,
        config.fast_provisioning_enabled,
        metrics.clone(),
    );
    let scheduler = Arc::new(scheduler);
    let trigger = Arc::new(ReviewTrigger::new(
        config.fast_provisioning_enabled,
        providers.clone(),
        filter.clone(),
        scheduler.clone(),
    ));
    let queue = Arc::new(WorkQueue::new().with_listener(trigger));

    // Strategy chain
    let engine = CapacityDecisionEngine::new(
        providers.clone(),
        filter,
        limiter.clone(),
        queue.clone(),
        metrics.clone(),
    );
    let strategies = StrategyRegistry::new(metrics.clone())
        .with(Arc::new(engine))
        .with(Arc::new(FallbackStrategy));
    info!(strategies = ?strategies.names(), "Strategy chain configured");

    let reviewer = Arc::new(Reviewer::new(
        queue.clone(),
        Arc::new(strategies),
        scheduler,
        metrics,
    ));

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start review worker in background
    let worker = ReviewWorker::new(reviewer, requests, config.review_interval);
    let worker_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            worker.run(shutdown_rx).await;
        }
    });

    // Start load generator in background
    let simulator_handle = config.simulate_arrival.map(|every| {
        let classes = simulated_classes(&config);
        tokio::spawn(simulate(
            queue.clone(),
            limiter.clone(),
            classes,
            every,
            shutdown_rx.clone(),
        ))
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, worker_handle).await {
        warn!(error = %e, "Review worker did not shut down in time");
    }

    if let Some(handle) = simulator_handle {
        if let Err(e) = tokio::time::timeout(shutdown_timeout, handle).await {
            warn!(error = %e, "Load generator did not shut down in time");
        }
    }

    info!(pending_items = queue.len(), "Provisioner shutdown complete");
    Ok(())
}

/// Every class some configured provider serves, in first-seen order.
fn simulated_classes(config: &Config) -> Vec<ResourceClass> {
    let mut classes: Vec<ResourceClass> = Vec::new();
    for class in config.providers.iter().flat_map(|p| p.classes.iter()) {
        if !classes.contains(class) {
            classes.push(class.clone());
        }
    }
    classes
}

/// Submit one buildable item per tick, round robin over `classes`, and bring
/// capacity planned on the previous tick online.
async fn simulate(
    queue: Arc<WorkQueue>,
    limiter: Arc<dyn CapacityLimiter>,
    classes: Vec<ResourceClass>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if classes.is_empty() {
        return;
    }
    info!(interval_ms = every.as_millis() as u64, "Starting load generator");

    let mut interval = tokio::time::interval(every);
    let mut next = classes.iter().cycle();

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for class in &classes {
                    run_ready_work(&queue, limiter.as_ref(), class);
                }
                if let Some(class) = next.next() {
                    let id = queue.submit_buildable(WorkItem::new(class.clone()));
                    debug!(work_item_id = %id, class = %class, "Submitted work item");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Load generator shutting down");
                    break;
                }
            }
        }
    }
}

/// Bring in-flight capacity online and run buildable items on it.
///
/// Each unit runs one item and is retired immediately afterwards.
fn run_ready_work(queue: &WorkQueue, limiter: &dyn CapacityLimiter, class: &ResourceClass) {
    for planned in queue.in_flight_ids(class) {
        if let Err(e) = queue.capacity_online(planned) {
            warn!(planned_capacity_id = %planned, error = %e, "Failed to bring capacity online");
            continue;
        }
        limiter.release(planned);
    }

    for pending in queue.snapshot(class).items {
        match queue.assign(pending.item.id) {
            Ok(()) => debug!(work_item_id = %pending.item.id, class = %class, "Work item assigned"),
            Err(_) => break,
        }
    }
}
