//! Capacity review scheduling.
//!
//! The scheduler turns pending demand into provisioning requests:
//! - [`ReviewTrigger`] asks for an immediate review when work becomes ready
//! - [`ReviewScheduler`] debounces those requests per resource class
//! - [`ReviewWorker`] runs requested and periodic reviews in the background
//! - [`Reviewer`] captures demand and runs the [`StrategyRegistry`]
//! - [`CapacityDecisionEngine`] is the no-delay strategy that plans capacity

pub mod debounce;
pub mod engine;
pub mod registry;
pub mod review;
pub mod state;
pub mod strategy;
pub mod trigger;
pub mod worker;

pub use debounce::{RequestOutcome, ReviewRequest, ReviewScheduler};
pub use engine::CapacityDecisionEngine;
pub use registry::{ChainOutcome, StrategyRegistry};
pub use review::{ReviewOutcome, ReviewStats, Reviewer};
pub use state::{ClassDemand, ReviewState};
pub use strategy::{FallbackStrategy, ProvisioningStrategy, StrategyError};
pub use trigger::{ReviewTrigger, TriggerOutcome};
pub use worker::ReviewWorker;
