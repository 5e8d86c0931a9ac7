//! nodelay provisioner library.
//!
//! Immediate, event-triggered, capacity-aware provisioning: when a unit of
//! work becomes ready, the engine reviews demand for its resource class and
//! asks eligible capacity providers for the shortfall right away instead of
//! waiting for the next periodic review.

pub mod config;
pub mod filter;
pub mod limiter;
pub mod metrics;
pub mod model;
pub mod provider;
pub mod queue;
pub mod scheduler;
pub mod tracker;
