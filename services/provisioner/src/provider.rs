//! Capacity provider interface, registry and mock implementation.
//!
//! A provider (a cloud) is an external capacity source that can create new
//! execution capacity on demand. The review engine only:
//! - Asks whether a provider has headroom for a resource class
//! - Issues provisioning requests and records what was planned
//!
//! A mock implementation is provided for testing and development.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use nodelay_id::ProviderId;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{PlannedCapacity, ResourceClass};

/// Errors returned by a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider could not answer an eligibility query.
    #[error("provider query failed: {0}")]
    Query(String),

    /// The provider refused or failed a provisioning request.
    #[error("provisioning failed: {0}")]
    Provision(String),
}

/// Capacity provider interface.
#[async_trait]
pub trait CapacityProvider: Send + Sync {
    /// Stable identity.
    fn id(&self) -> ProviderId;

    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Provider kind (e.g. "kubernetes"), used by kind filters.
    fn kind(&self) -> &str;

    /// Resource classes this provider can create capacity for.
    fn resource_classes(&self) -> &[ResourceClass];

    /// Check whether the provider serves a resource class.
    fn supports(&self, class: &ResourceClass) -> bool {
        self.resource_classes().contains(class)
    }

    /// Cheap, non-blocking headroom check.
    ///
    /// `current_planned` is the capacity already planned against this
    /// provider that has not come online.
    fn can_provision(
        &self,
        class: &ResourceClass,
        current_planned: u32,
    ) -> Result<bool, ProviderError>;

    /// Request `units` of new capacity.
    ///
    /// Returns once the request is accepted; the capacity itself comes
    /// online later.
    async fn provision(
        &self,
        class: &ResourceClass,
        units: u32,
    ) -> Result<Vec<PlannedCapacity>, ProviderError>;
}

/// Providers in registration order.
///
/// Registration order is the cross-provider ordering used for first-fit
/// provisioning.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn CapacityProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider after all previously registered ones.
    pub fn register(&mut self, provider: Arc<dyn CapacityProvider>) {
        info!(
            provider_id = %provider.id(),
            provider = %provider.name(),
            kind = %provider.kind(),
            "Registered capacity provider"
        );
        self.providers.push(provider);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, provider: Arc<dyn CapacityProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CapacityProvider>> {
        self.providers.iter()
    }

    pub fn get(&self, id: ProviderId) -> Option<&Arc<dyn CapacityProvider>> {
        self.providers.iter().find(|p| p.id() == id)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Mock provider for testing and development.
///
/// Every provisioned unit becomes its own [`PlannedCapacity`] of one unit.
pub struct MockProvider {
    id: ProviderId,
    name: String,
    kind: String,
    classes: Vec<ResourceClass>,

    /// Answer for `can_provision`.
    headroom: AtomicBool,

    /// Whether eligibility queries error.
    fail_queries: AtomicBool,

    /// Whether provisioning requests error.
    fail_provision: AtomicBool,

    /// Units requested so far, across classes.
    units_requested: AtomicU32,

    /// Every accepted request, in order.
    requests: Mutex<Vec<(ResourceClass, u32)>>,
}

impl MockProvider {
    /// Create a mock provider with headroom for the given classes.
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        classes: impl IntoIterator<Item = ResourceClass>,
    ) -> Self {
        Self {
            id: ProviderId::new(),
            name: name.into(),
            kind: kind.into(),
            classes: classes.into_iter().collect(),
            headroom: AtomicBool::new(true),
            fail_queries: AtomicBool::new(false),
            fail_provision: AtomicBool::new(false),
            units_requested: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock provider whose eligibility queries fail.
    pub fn failing_queries(
        name: impl Into<String>,
        kind: impl Into<String>,
        classes: impl IntoIterator<Item = ResourceClass>,
    ) -> Self {
        let provider = Self::new(name, kind, classes);
        provider.fail_queries.store(true, Ordering::SeqCst);
        provider
    }

    /// Create a mock provider that rejects every provisioning request.
    pub fn failing_provision(
        name: impl Into<String>,
        kind: impl Into<String>,
        classes: impl IntoIterator<Item = ResourceClass>,
    ) -> Self {
        let provider = Self::new(name, kind, classes);
        provider.fail_provision.store(true, Ordering::SeqCst);
        provider
    }

    /// Change the answer returned by `can_provision`.
    pub fn set_headroom(&self, headroom: bool) {
        self.headroom.store(headroom, Ordering::SeqCst);
    }

    /// Total units requested from this provider.
    pub fn units_requested(&self) -> u32 {
        self.units_requested.load(Ordering::SeqCst)
    }

    /// Accepted requests, in order.
    pub fn requests(&self) -> Vec<(ResourceClass, u32)> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CapacityProvider for MockProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn resource_classes(&self) -> &[ResourceClass] {
        &self.classes
    }

    fn can_provision(
        &self,
        class: &ResourceClass,
        current_planned: u32,
    ) -> Result<bool, ProviderError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(ProviderError::Query(format!(
                "[MOCK] {} configured to fail queries",
                self.name
            )));
        }

        debug!(
            provider = %self.name,
            class = %class,
            current_planned,
            "[MOCK] Checking headroom"
        );

        Ok(self.supports(class) && self.headroom.load(Ordering::SeqCst))
    }

    async fn provision(
        &self,
        class: &ResourceClass,
        units: u32,
    ) -> Result<Vec<PlannedCapacity>, ProviderError> {
        if self.fail_provision.load(Ordering::SeqCst) {
            return Err(ProviderError::Provision(format!(
                "[MOCK] {} configured to fail",
                self.name
            )));
        }

        info!(
            provider = %self.name,
            class = %class,
            units,
            "[MOCK] Provisioning capacity"
        );

        self.units_requested.fetch_add(units, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((class.clone(), units));

        // Hand control back like a remote call would.
        tokio::task::yield_now().await;

        Ok((0..units)
            .map(|_| PlannedCapacity::new(self.id, class.clone(), 1))
            .collect())
    }
}
