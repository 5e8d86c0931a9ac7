//! Work queue: the demand side of provisioning.
//!
//! The review engine never holds on to queue state between cycles. At the
//! start of every review it reads a fresh [`ClassSnapshot`] through
//! [`DemandSource`], and once the strategies are done it hands back the
//! capacity they planned. A work item that was cancelled between a trigger and
//! the review it caused is therefore simply absent from the snapshot.
//!
//! [`WorkQueue`] is an in-memory implementation used by the development
//! binary and tests. It also plays the host's tracker role: it links items to
//! planned capacity and refuses a second link for the same item. A link only
//! counts while its capacity is still in flight; once the capacity comes
//! online, or the item runs elsewhere, the link is dropped or handed on.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nodelay_id::{PlannedCapacityId, ProviderId, WorkItemId};
use thiserror::Error;
use tracing::debug;

use crate::model::{ClassSnapshot, PendingItem, PlannedCapacity, ResourceClass, WorkItem};
use crate::tracker::{QueueItemTracker, TrackerError};

/// Read side of the queue used by reviews.
pub trait DemandSource: Send + Sync {
    /// Classes that currently have buildable work.
    fn pending_classes(&self) -> Vec<ResourceClass>;

    /// Buildable items plus available and in-flight capacity for a class.
    fn snapshot(&self, class: &ResourceClass) -> ClassSnapshot;

    /// In-flight capacity units per provider, across classes.
    fn in_flight_by_provider(&self) -> HashMap<ProviderId, u32>;

    /// Record capacity planned by a review as in flight.
    fn record_pending(&self, planned: &[PlannedCapacity]);
}

/// Hook invoked when a work item becomes buildable.
pub trait QueueListener: Send + Sync {
    fn on_enter_buildable(&self, item: &WorkItem);
}

/// Queue errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("work item {0} is not queued")]
    UnknownItem(WorkItemId),

    #[error("work item {0} is not buildable")]
    NotBuildable(WorkItemId),

    #[error("no available capacity for {0}")]
    NoCapacity(ResourceClass),

    #[error("planned capacity {0} is not in flight")]
    UnknownCapacity(PlannedCapacityId),
}

/// Lifecycle state of a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItemState {
    /// Submitted, prerequisites not yet satisfied.
    Waiting,
    /// Ready to run as soon as capacity exists.
    Buildable,
}

#[derive(Debug)]
struct QueuedItem {
    item: WorkItem,
    state: WorkItemState,
    planned: Option<PlannedCapacityId>,
}

#[derive(Debug, Default)]
struct QueueState {
    items: BTreeMap<WorkItemId, QueuedItem>,
    in_flight: HashMap<PlannedCapacityId, PlannedCapacity>,
    available: HashMap<ResourceClass, u32>,
}

/// In-memory work queue.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    listeners: Vec<Arc<dyn QueueListener>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener notified whenever an item becomes buildable.
    pub fn with_listener(mut self, listener: Arc<dyn QueueListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit an item whose prerequisites are not yet satisfied.
    pub fn submit(&self, item: WorkItem) -> WorkItemId {
        let id = item.id;
        self.lock().items.insert(
            id,
            QueuedItem {
                item,
                state: WorkItemState::Waiting,
                planned: None,
            },
        );
        id
    }

    /// Submit an item that can run immediately.
    pub fn submit_buildable(&self, item: WorkItem) -> WorkItemId {
        let id = self.submit(item);
        // Freshly inserted, so the transition cannot fail.
        let _ = self.make_buildable(id);
        id
    }

    /// Move an item to buildable and notify listeners.
    ///
    /// Listeners run after the queue lock is released.
    pub fn make_buildable(&self, id: WorkItemId) -> Result<(), QueueError> {
        let item = {
            let mut state = self.lock();
            let queued = state.items.get_mut(&id).ok_or(QueueError::UnknownItem(id))?;
            if queued.state == WorkItemState::Buildable {
                return Ok(());
            }
            queued.state = WorkItemState::Buildable;
            queued.item.clone()
        };

        debug!(work_item_id = %item.id, class = %item.class, "Work item buildable");
        for listener in &self.listeners {
            listener.on_enter_buildable(&item);
        }
        Ok(())
    }

    /// Remove an item without running it. Returns false if it was not queued.
    pub fn cancel(&self, id: WorkItemId) -> bool {
        let removed = self.lock().items.remove(&id).is_some();
        if removed {
            debug!(work_item_id = %id, "Work item cancelled");
        }
        removed
    }

    /// Planned capacity came online: its units move from in flight to available.
    pub fn capacity_online(&self, id: PlannedCapacityId) -> Result<(), QueueError> {
        let mut state = self.lock();
        let planned = state
            .in_flight
            .remove(&id)
            .ok_or(QueueError::UnknownCapacity(id))?;
        *state.available.entry(planned.class.clone()).or_insert(0) += planned.units;
        for queued in state.items.values_mut() {
            if queued.planned == Some(id) {
                queued.planned = None;
            }
        }
        debug!(planned_capacity_id = %id, class = %planned.class, units = planned.units, "Capacity online");
        Ok(())
    }

    /// Run a buildable item on available capacity, removing it from the queue.
    ///
    /// If the item was linked to capacity that is still in flight, the link
    /// passes to the oldest unlinked buildable item of the same class.
    pub fn assign(&self, id: WorkItemId) -> Result<(), QueueError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let queued = state.items.get(&id).ok_or(QueueError::UnknownItem(id))?;
        if queued.state != WorkItemState::Buildable {
            return Err(QueueError::NotBuildable(id));
        }
        let class = queued.item.class.clone();

        let available = state.available.entry(class.clone()).or_insert(0);
        if *available == 0 {
            return Err(QueueError::NoCapacity(class));
        }
        *available -= 1;

        let link = state
            .items
            .remove(&id)
            .and_then(|q| q.planned)
            .filter(|p| state.in_flight.contains_key(p));
        if let Some(planned) = link {
            let heir = state
                .items
                .values_mut()
                .filter(|q| {
                    q.state == WorkItemState::Buildable
                        && q.item.class == class
                        && !q.planned.is_some_and(|p| state.in_flight.contains_key(&p))
                })
                .min_by(|a, b| {
                    a.item
                        .enqueued_at
                        .cmp(&b.item.enqueued_at)
                        .then(a.item.id.cmp(&b.item.id))
                });
            if let Some(heir) = heir {
                heir.planned = Some(planned);
                debug!(work_item_id = %heir.item.id, planned_capacity_id = %planned, "Link handed on");
            }
        }
        Ok(())
    }

    /// State of a queued item.
    pub fn state_of(&self, id: WorkItemId) -> Option<WorkItemState> {
        self.lock().items.get(&id).map(|q| q.state)
    }

    /// Planned capacity an item is linked to.
    pub fn link_of(&self, id: WorkItemId) -> Option<PlannedCapacityId> {
        self.lock().items.get(&id).and_then(|q| q.planned)
    }

    /// Ids of in-flight planned capacity for a class.
    pub fn in_flight_ids(&self, class: &ResourceClass) -> Vec<PlannedCapacityId> {
        self.lock()
            .in_flight
            .values()
            .filter(|p| &p.class == class)
            .map(|p| p.id)
            .collect()
    }

    /// Number of queued items in any state.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

impl DemandSource for WorkQueue {
    fn pending_classes(&self) -> Vec<ResourceClass> {
        let classes: BTreeSet<ResourceClass> = self
            .lock()
            .items
            .values()
            .filter(|q| q.state == WorkItemState::Buildable)
            .map(|q| q.item.class.clone())
            .collect();
        classes.into_iter().collect()
    }

    fn snapshot(&self, class: &ResourceClass) -> ClassSnapshot {
        let state = self.lock();

        let mut items: Vec<PendingItem> = state
            .items
            .values()
            .filter(|q| q.state == WorkItemState::Buildable && &q.item.class == class)
            .map(|q| PendingItem {
                item: q.item.clone(),
                planned: q.planned.filter(|p| state.in_flight.contains_key(p)),
            })
            .collect();
        items.sort_by(|a, b| {
            a.item
                .enqueued_at
                .cmp(&b.item.enqueued_at)
                .then(a.item.id.cmp(&b.item.id))
        });

        let in_flight = state
            .in_flight
            .values()
            .filter(|p| &p.class == class)
            .map(|p| p.units)
            .sum();

        ClassSnapshot {
            items,
            available: state.available.get(class).copied().unwrap_or(0),
            in_flight,
        }
    }

    fn in_flight_by_provider(&self) -> HashMap<ProviderId, u32> {
        let mut by_provider = HashMap::new();
        for planned in self.lock().in_flight.values() {
            *by_provider.entry(planned.provider_id).or_insert(0) += planned.units;
        }
        by_provider
    }

    fn record_pending(&self, planned: &[PlannedCapacity]) {
        let mut state = self.lock();
        for p in planned {
            state.in_flight.insert(p.id, p.clone());
        }
    }
}

impl QueueItemTracker for WorkQueue {
    fn track(&self, item: WorkItemId, planned: PlannedCapacityId) -> Result<(), TrackerError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let queued = state
            .items
            .get_mut(&item)
            .ok_or(TrackerError::UnknownItem(item))?;

        match queued.planned {
            Some(existing) if existing != planned && state.in_flight.contains_key(&existing) => {
                Err(TrackerError::AlreadyLinked { item, existing })
            }
            _ => {
                queued.planned = Some(planned);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn linux() -> ResourceClass {
        ResourceClass::label("linux")
    }

    #[derive(Default)]
    struct CountingListener(AtomicUsize);

    impl QueueListener for CountingListener {
        fn on_enter_buildable(&self, _: &WorkItem) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_make_buildable_notifies_once() {
        let listener = Arc::new(CountingListener::default());
        let queue = WorkQueue::new().with_listener(listener.clone());

        let id = queue.submit(WorkItem::new(linux()));
        assert_eq!(queue.state_of(id), Some(WorkItemState::Waiting));
        assert!(queue.pending_classes().is_empty());

        queue.make_buildable(id).unwrap();
        queue.make_buildable(id).unwrap();
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_classes(), vec![linux()]);
    }

    #[test]
    fn test_snapshot_counts_in_flight_and_available() {
        let queue = WorkQueue::new();
        let provider = ProviderId::new();
        queue.submit_buildable(WorkItem::new(linux()));
        queue.submit_buildable(WorkItem::new(linux()));
        queue.submit_buildable(WorkItem::unlabeled());

        let a = PlannedCapacity::new(provider, linux(), 1);
        let b = PlannedCapacity::new(provider, linux(), 1);
        queue.record_pending(&[a.clone(), b]);
        queue.capacity_online(a.id).unwrap();

        let snapshot = queue.snapshot(&linux());
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(snapshot.available, 1);
        assert_eq!(snapshot.in_flight, 1);
        assert_eq!(queue.in_flight_by_provider().get(&provider), Some(&1));
    }

    #[test]
    fn test_cancelled_item_leaves_snapshot() {
        let queue = WorkQueue::new();
        let id = queue.submit_buildable(WorkItem::new(linux()));
        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(queue.snapshot(&linux()).items.is_empty());
    }

    #[test]
    fn test_assign_consumes_available_capacity() {
        let queue = WorkQueue::new();
        let id = queue.submit_buildable(WorkItem::new(linux()));
        assert_eq!(queue.assign(id), Err(QueueError::NoCapacity(linux())));

        let planned = PlannedCapacity::new(ProviderId::new(), linux(), 1);
        queue.record_pending(std::slice::from_ref(&planned));
        queue.capacity_online(planned.id).unwrap();

        queue.assign(id).unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.snapshot(&linux()).available, 0);
    }

    #[test]
    fn test_assign_requires_buildable() {
        let queue = WorkQueue::new();
        let id = queue.submit(WorkItem::new(linux()));
        assert_eq!(queue.assign(id), Err(QueueError::NotBuildable(id)));
    }

    #[test]
    fn test_track_refuses_second_link() {
        let queue = WorkQueue::new();
        let id = queue.submit_buildable(WorkItem::new(linux()));
        let planned = PlannedCapacity::new(ProviderId::new(), linux(), 1);
        let first = planned.id;
        queue.record_pending(&[planned]);

        queue.track(id, first).unwrap();
        queue.track(id, first).unwrap();
        assert_eq!(queue.link_of(id), Some(first));

        let err = queue.track(id, PlannedCapacityId::new()).unwrap_err();
        assert_eq!(
            err,
            TrackerError::AlreadyLinked {
                item: id,
                existing: first
            }
        );

        let unknown = WorkItemId::new();
        assert_eq!(
            queue.track(unknown, first),
            Err(TrackerError::UnknownItem(unknown))
        );
    }

    #[test]
    fn test_link_is_dropped_when_capacity_comes_online() {
        let queue = WorkQueue::new();
        let id = queue.submit_buildable(WorkItem::new(linux()));
        let planned = PlannedCapacity::new(ProviderId::new(), linux(), 1);
        queue.record_pending(std::slice::from_ref(&planned));
        queue.track(id, planned.id).unwrap();

        queue.capacity_online(planned.id).unwrap();

        assert_eq!(queue.link_of(id), None);
        assert_eq!(queue.snapshot(&linux()).items[0].planned, None);
        let next = PlannedCapacityId::new();
        queue.track(id, next).unwrap();
    }

    #[test]
    fn test_link_passes_on_when_item_runs_on_other_capacity() {
        let queue = WorkQueue::new();
        let provider = ProviderId::new();
        let first = queue.submit_buildable(WorkItem::new(linux()));
        let second = queue.submit_buildable(WorkItem::new(linux()));
        let a = PlannedCapacity::new(provider, linux(), 1);
        let b = PlannedCapacity::new(provider, linux(), 1);
        queue.record_pending(&[a.clone(), b.clone()]);
        queue.track(first, a.id).unwrap();
        queue.track(second, b.id).unwrap();

        // First's capacity arrives but second takes it.
        queue.capacity_online(a.id).unwrap();
        queue.assign(second).unwrap();

        assert_eq!(queue.link_of(first), Some(b.id));
        assert_eq!(queue.in_flight_ids(&linux()), vec![b.id]);
        let snapshot = queue.snapshot(&linux());
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].planned, Some(b.id));
        assert_eq!(snapshot.in_flight, 1);
    }
}
