//! Review state: the ephemeral snapshot one review cycle works on.
//!
//! Built fresh from the [`DemandSource`] when a review starts and discarded
//! when it ends. Strategies mutate it as they plan capacity so that later
//! strategies in the chain see the updated counts.

use std::collections::{BTreeMap, HashMap};

use nodelay_capacity::{CapacityCounts, LimitBudget};
use nodelay_id::{PlannedCapacityId, ProviderId, ReviewId, WorkItemId};

use crate::model::{ClassSnapshot, PendingItem, PlannedCapacity, ResourceClass};
use crate::queue::DemandSource;

/// Demand and capacity for one class within a review.
#[derive(Debug, Clone, Default)]
pub struct ClassDemand {
    /// Buildable items, oldest first.
    pub items: Vec<PendingItem>,
    pub counts: CapacityCounts,
}

impl From<ClassSnapshot> for ClassDemand {
    fn from(snapshot: ClassSnapshot) -> Self {
        let demand = u32::try_from(snapshot.items.len()).unwrap_or(u32::MAX);
        Self {
            counts: CapacityCounts::new(demand, snapshot.available, snapshot.in_flight),
            items: snapshot.items,
        }
    }
}

/// State shared by all strategies during one review.
#[derive(Debug)]
pub struct ReviewState {
    review_id: ReviewId,
    classes: BTreeMap<ResourceClass, ClassDemand>,
    planned_by_provider: HashMap<ProviderId, u32>,
    planned: Vec<PlannedCapacity>,
    budget: LimitBudget<(ProviderId, ResourceClass)>,
}

impl Default for ReviewState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReviewState {
    /// An empty state.
    pub fn new() -> Self {
        Self {
            review_id: ReviewId::new(),
            classes: BTreeMap::new(),
            planned_by_provider: HashMap::new(),
            planned: Vec::new(),
            budget: LimitBudget::new(),
        }
    }

    /// Capture current demand for `classes` from the queue.
    pub fn capture<I>(source: &dyn DemandSource, classes: I) -> Self
    where
        I: IntoIterator<Item = ResourceClass>,
    {
        let mut state = Self::new();
        for class in classes {
            let snapshot = source.snapshot(&class);
            state.insert_class(class, snapshot);
        }
        state.planned_by_provider = source.in_flight_by_provider();
        state
    }

    /// Add or replace one class.
    pub fn insert_class(&mut self, class: ResourceClass, snapshot: ClassSnapshot) {
        self.classes.insert(class, snapshot.into());
    }

    /// Builder form of [`insert_class`](Self::insert_class).
    pub fn with_class(mut self, class: ResourceClass, snapshot: ClassSnapshot) -> Self {
        self.insert_class(class, snapshot);
        self
    }

    pub fn review_id(&self) -> ReviewId {
        self.review_id
    }

    /// Classes under review, in order.
    pub fn classes(&self) -> impl Iterator<Item = &ResourceClass> {
        self.classes.keys()
    }

    pub fn class(&self, class: &ResourceClass) -> Option<&ClassDemand> {
        self.classes.get(class)
    }

    /// Demand for a class not yet covered by available or in-flight capacity.
    pub fn unsatisfied_demand(&self, class: &ResourceClass) -> u32 {
        self.classes
            .get(class)
            .map(|c| c.counts.shortfall())
            .unwrap_or(0)
    }

    /// Total uncovered demand across all classes.
    pub fn total_unsatisfied_demand(&self) -> u32 {
        self.classes
            .values()
            .map(|c| c.counts.shortfall())
            .fold(0, u32::saturating_add)
    }

    /// Capacity planned against a provider that has not come online,
    /// including anything planned earlier in this review.
    pub fn planned_for(&self, provider: ProviderId) -> u32 {
        self.planned_by_provider.get(&provider).copied().unwrap_or(0)
    }

    /// Remaining limit for a provider and class in this review.
    ///
    /// `read` is consulted only the first time the pair is seen.
    pub fn remaining_limit<F>(&mut self, provider: ProviderId, class: &ResourceClass, read: F) -> u32
    where
        F: FnOnce() -> u32,
    {
        self.budget
            .remaining_or_read(&(provider, class.clone()), read)
    }

    /// Record capacity a provider accepted.
    ///
    /// Updates in-flight counts and the provider's budget, and links each
    /// planned unit to one unlinked item, oldest first. Returns the new links
    /// so the caller can report them to the tracker.
    pub fn record_planned(
        &mut self,
        class: &ResourceClass,
        provider: ProviderId,
        planned: Vec<PlannedCapacity>,
    ) -> Vec<(WorkItemId, PlannedCapacityId)> {
        let units: u32 = planned.iter().map(|p| p.units).fold(0, u32::saturating_add);
        self.budget.consume(&(provider, class.clone()), units);
        *self.planned_by_provider.entry(provider).or_insert(0) += units;

        let mut links = Vec::new();
        if let Some(demand) = self.classes.get_mut(class) {
            demand.counts.record_planned(units);

            let mut unlinked = demand.items.iter_mut().filter(|i| i.planned.is_none());
            for p in &planned {
                for _ in 0..p.units {
                    let Some(item) = unlinked.next() else {
                        break;
                    };
                    item.planned = Some(p.id);
                    links.push((item.item.id, p.id));
                }
            }
        }

        self.planned.extend(planned);
        links
    }

    /// Capacity planned during this review.
    pub fn planned(&self) -> &[PlannedCapacity] {
        &self.planned
    }

    /// Units planned during this review.
    pub fn units_requested(&self) -> u32 {
        self.planned.iter().map(|p| p.units).fold(0, u32::saturating_add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkItem;

    fn linux() -> ResourceClass {
        ResourceClass::label("linux")
    }

    fn snapshot(items: usize, available: u32, in_flight: u32) -> ClassSnapshot {
        ClassSnapshot {
            items: (0..items)
                .map(|_| PendingItem::unlinked(WorkItem::new(linux())))
                .collect(),
            available,
            in_flight,
        }
    }

    #[test]
    fn test_unsatisfied_demand() {
        let state = ReviewState::new().with_class(linux(), snapshot(5, 1, 1));
        assert_eq!(state.unsatisfied_demand(&linux()), 3);
        assert_eq!(state.unsatisfied_demand(&ResourceClass::Unlabeled), 0);
    }

    #[test]
    fn test_record_planned_links_oldest_unlinked_items() {
        let mut state = ReviewState::new().with_class(linux(), snapshot(3, 0, 0));
        let provider = ProviderId::new();
        let planned = vec![
            PlannedCapacity::new(provider, linux(), 1),
            PlannedCapacity::new(provider, linux(), 1),
        ];

        let links = state.record_planned(&linux(), provider, planned);

        assert_eq!(links.len(), 2);
        let items = &state.class(&linux()).unwrap().items;
        assert_eq!(links[0].0, items[0].item.id);
        assert_eq!(links[1].0, items[1].item.id);
        assert!(items[2].planned.is_none());
        assert_eq!(state.unsatisfied_demand(&linux()), 1);
        assert_eq!(state.planned_for(provider), 2);
        assert_eq!(state.units_requested(), 2);
    }

    #[test]
    fn test_record_planned_skips_linked_items() {
        let mut snap = snapshot(2, 0, 1);
        snap.items[0].planned = Some(PlannedCapacityId::new());
        let mut state = ReviewState::new().with_class(linux(), snap);
        let provider = ProviderId::new();

        let links = state.record_planned(
            &linux(),
            provider,
            vec![PlannedCapacity::new(provider, linux(), 1)],
        );

        let items = &state.class(&linux()).unwrap().items;
        assert_eq!(links, vec![(items[1].item.id, state.planned()[0].id)]);
    }

    #[test]
    fn test_remaining_limit_is_fixed_per_review() {
        let mut state = ReviewState::new().with_class(linux(), snapshot(10, 0, 0));
        let provider = ProviderId::new();

        assert_eq!(state.remaining_limit(provider, &linux(), || 4), 4);
        state.record_planned(
            &linux(),
            provider,
            vec![PlannedCapacity::new(provider, linux(), 3)],
        );
        assert_eq!(state.remaining_limit(provider, &linux(), || 100), 1);
    }
}
