//! Provisioning limits.
//!
//! The limiter enforces global ceilings on how much capacity each provider may
//! hold per resource class. The engine reads the remaining limit once per
//! provider and class at the start of a review and never requests more than
//! that. A limiter that cannot answer is treated as having no room left.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use nodelay_id::{PlannedCapacityId, ProviderId};
use thiserror::Error;

use crate::model::{PlannedCapacity, ResourceClass};

/// Errors returned by a limiter.
#[derive(Debug, Error)]
pub enum LimitError {
    /// The limiter has no ceiling configured for this provider.
    #[error("no limit configured for provider {0}")]
    UnknownProvider(ProviderId),

    /// The limiter's backing store could not be read.
    #[error("limit lookup failed: {0}")]
    Unavailable(String),
}

/// Global provisioning ceilings.
pub trait CapacityLimiter: Send + Sync {
    /// Units `provider` may still provision for `class`.
    fn remaining_limit(&self, provider: ProviderId, class: &ResourceClass)
        -> Result<u32, LimitError>;

    /// Account for newly planned capacity.
    fn register(&self, planned: &PlannedCapacity) -> Result<(), LimitError>;

    /// Return capacity to the pool once it has been retired.
    fn release(&self, planned: PlannedCapacityId);
}

/// Limiter that never limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedLimiter;

impl CapacityLimiter for UnlimitedLimiter {
    fn remaining_limit(&self, _: ProviderId, _: &ResourceClass) -> Result<u32, LimitError> {
        Ok(u32::MAX)
    }

    fn register(&self, _: &PlannedCapacity) -> Result<(), LimitError> {
        Ok(())
    }

    fn release(&self, _: PlannedCapacityId) {}
}

/// Fixed per-provider, per-class ceilings with in-memory usage counters.
///
/// Providers without a configured ceiling are an error, which the engine
/// treats as zero remaining.
#[derive(Debug, Default)]
pub struct StaticLimiter {
    ceilings: HashMap<(ProviderId, ResourceClass), u32>,
    usage: Mutex<HashMap<PlannedCapacityId, (ProviderId, ResourceClass, u32)>>,
}

impl StaticLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ceiling for a provider and class.
    pub fn with_ceiling(mut self, provider: ProviderId, class: ResourceClass, ceiling: u32) -> Self {
        self.ceilings.insert((provider, class), ceiling);
        self
    }

    /// Units currently registered against a provider and class.
    pub fn in_use(&self, provider: ProviderId, class: &ResourceClass) -> u32 {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|(p, c, _)| *p == provider && c == class)
            .map(|(_, _, units)| *units)
            .sum()
    }
}

impl CapacityLimiter for StaticLimiter {
    fn remaining_limit(
        &self,
        provider: ProviderId,
        class: &ResourceClass,
    ) -> Result<u32, LimitError> {
        let ceiling = self
            .ceilings
            .get(&(provider, class.clone()))
            .copied()
            .ok_or(LimitError::UnknownProvider(provider))?;

        Ok(ceiling.saturating_sub(self.in_use(provider, class)))
    }

    fn register(&self, planned: &PlannedCapacity) -> Result<(), LimitError> {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner).insert(
            planned.id,
            (planned.provider_id, planned.class.clone(), planned.units),
        );
        Ok(())
    }

    fn release(&self, planned: PlannedCapacityId) {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&planned);
    }
}
