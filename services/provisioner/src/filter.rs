//! Provider filters.
//!
//! A filter restricts which providers a strategy (and the fast-path trigger)
//! may act on. A provider rejected by the filter is never sent a provisioning
//! request by that strategy.

use crate::model::ResourceClass;
use crate::provider::CapacityProvider;

/// Predicate over providers for a resource class.
pub trait ProviderFilter: Send + Sync {
    fn should_process_provider(&self, provider: &dyn CapacityProvider, class: &ResourceClass)
        -> bool;
}

/// Accepts every provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllProviders;

impl ProviderFilter for AllProviders {
    fn should_process_provider(&self, _: &dyn CapacityProvider, _: &ResourceClass) -> bool {
        true
    }
}

/// Accepts only providers of one kind, e.g. "kubernetes".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindFilter {
    kind: String,
}

impl KindFilter {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl ProviderFilter for KindFilter {
    fn should_process_provider(&self, provider: &dyn CapacityProvider, _: &ResourceClass) -> bool {
        provider.kind() == self.kind
    }
}

impl<F> ProviderFilter for F
where
    F: Fn(&dyn CapacityProvider, &ResourceClass) -> bool + Send + Sync,
{
    fn should_process_provider(&self, provider: &dyn CapacityProvider, class: &ResourceClass) -> bool {
        self(provider, class)
    }
}
