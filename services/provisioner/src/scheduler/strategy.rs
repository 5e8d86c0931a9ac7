//! Provisioning strategy interface.

use async_trait::async_trait;
use thiserror::Error;

use super::state::ReviewState;
use crate::model::ProvisioningDecision;

/// Errors a strategy may return. The registry logs them and moves on.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("strategy failed: {0}")]
    Failed(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// A provisioning strategy.
///
/// Strategies run in ascending [`ordinal`](Self::ordinal) order. Each one may
/// plan capacity by mutating the shared [`ReviewState`] and then decides
/// whether the remaining strategies still need to run.
#[async_trait]
pub trait ProvisioningStrategy: Send + Sync {
    /// Strategy name for logging and metrics.
    fn name(&self) -> &str;

    /// Position in the chain; lower runs first.
    fn ordinal(&self) -> i32;

    async fn apply(&self, state: &mut ReviewState) -> Result<ProvisioningDecision, StrategyError>;
}

/// Terminal strategy that always ends the chain.
///
/// Whatever demand is still uncovered waits for the next trigger or the next
/// periodic review.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackStrategy;

impl FallbackStrategy {
    pub const NAME: &'static str = "fallback";
}

#[async_trait]
impl ProvisioningStrategy for FallbackStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn ordinal(&self) -> i32 {
        i32::MAX
    }

    async fn apply(&self, _: &mut ReviewState) -> Result<ProvisioningDecision, StrategyError> {
        Ok(ProvisioningDecision::Complete)
    }
}
