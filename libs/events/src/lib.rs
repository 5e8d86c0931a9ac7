//! # nodelay-events
//!
//! Observability events emitted by the provisioner.
//!
//! Events are fire-and-forget: they describe what a review cycle or the fast
//! path did, and nothing reads them back to make decisions. Each event is
//! wrapped in an [`EventEnvelope`] carrying the event type name, the time it
//! occurred, and the review it belongs to when there is one.
//!
//! ## Event Types
//!
//! - Review events (`review.*`): requested, coalesced, completed
//! - Provisioning events (`provision.*`): requested, failed
//! - Strategy events (`strategy.*`): failed

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
