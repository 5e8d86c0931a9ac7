//! Capacity planning primitives.
//!
//! Pure arithmetic and bookkeeping shared by the review engine. Key
//! concepts:
//!
//! - **Demand**: pending work items that need somewhere to run.
//! - **Available**: provisioned capacity that is idle and can take work.
//! - **In flight**: capacity a provider accepted a request for that has not
//!   come online yet.
//! - **Shortfall**: demand not covered by available plus in-flight capacity.
//!
//! # Invariants
//!
//! - Counts are unsigned; shortfall saturates at zero, never goes negative
//! - A grant never exceeds the remaining limit it was computed from
//! - Repeating a decision with unchanged inputs yields a zero shortfall once
//!   the first decision was recorded

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Capacity counts for one resource class during one review cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapacityCounts {
    /// Pending work items.
    pub demand: u32,

    /// Idle provisioned capacity.
    pub available: u32,

    /// Requested capacity that has not come online yet.
    pub in_flight: u32,
}

impl CapacityCounts {
    /// Create counts from a queue snapshot.
    pub fn new(demand: u32, available: u32, in_flight: u32) -> Self {
        Self {
            demand,
            available,
            in_flight,
        }
    }

    /// Capacity that will be able to take work: available plus in flight.
    pub fn covered(&self) -> u32 {
        self.available.saturating_add(self.in_flight)
    }

    /// Demand not covered by available or in-flight capacity.
    pub fn shortfall(&self) -> u32 {
        self.demand.saturating_sub(self.covered())
    }

    /// Returns true when no further capacity is needed.
    pub fn is_satisfied(&self) -> bool {
        self.shortfall() == 0
    }

    /// Record newly requested units as in flight.
    pub fn record_planned(&mut self, units: u32) {
        self.in_flight = self.in_flight.saturating_add(units);
    }
}

/// Units to request from one provider: the shortfall, capped by its limit.
pub fn grant(shortfall: u32, remaining_limit: u32) -> u32 {
    shortfall.min(remaining_limit)
}

/// Remaining provisioning limits for the length of one review cycle.
///
/// The first lookup for a key fixes its remaining limit for the cycle; every
/// grant against that key is subtracted locally, so the sum of grants for a
/// key never exceeds the limit read at the start.
#[derive(Debug, Clone)]
pub struct LimitBudget<K: Ord> {
    remaining: BTreeMap<K, u32>,
}

impl<K: Ord> Default for LimitBudget<K> {
    fn default() -> Self {
        Self {
            remaining: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone> LimitBudget<K> {
    /// Create an empty budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining units for `key`, reading the limit with `read` on first use.
    pub fn remaining_or_read<F>(&mut self, key: &K, read: F) -> u32
    where
        F: FnOnce() -> u32,
    {
        if let Some(remaining) = self.remaining.get(key) {
            return *remaining;
        }
        let remaining = read();
        self.remaining.insert(key.clone(), remaining);
        remaining
    }

    /// Subtract granted units from the remaining limit for `key`.
    ///
    /// Returns the units left for the key.
    pub fn consume(&mut self, key: &K, units: u32) -> u32 {
        let remaining = self.remaining.entry(key.clone()).or_insert(0);
        *remaining = remaining.saturating_sub(units);
        *remaining
    }
}

/// Set of keys that have a review pending.
///
/// Marking an already pending key is a no-op, which is how redundant review
/// requests are coalesced.
#[derive(Debug, Clone)]
pub struct PendingSet<K: Ord> {
    pending: BTreeSet<K>,
}

impl<K: Ord> Default for PendingSet<K> {
    fn default() -> Self {
        Self {
            pending: BTreeSet::new(),
        }
    }
}

impl<K: Ord> PendingSet<K> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` pending. Returns false if it already was.
    pub fn mark(&mut self, key: K) -> bool {
        self.pending.insert(key)
    }

    /// Clear the pending mark for `key`. Returns true if it was pending.
    pub fn clear(&mut self, key: &K) -> bool {
        self.pending.remove(key)
    }

    /// Check whether `key` has a review pending.
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains(key)
    }

    /// Number of pending keys.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Default periodic review interval.
pub const DEFAULT_REVIEW_INTERVAL: Duration = Duration::from_secs(10);

/// Default capacity of the review request queue.
pub const DEFAULT_REVIEW_QUEUE_CAPACITY: usize = 1024;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_shortfall() {
        // Nothing provisioned yet
        assert_eq!(CapacityCounts::new(3, 0, 0).shortfall(), 3);

        // Partially covered by idle and pending capacity
        assert_eq!(CapacityCounts::new(5, 1, 2).shortfall(), 2);

        // Over-covered clamps to zero
        assert_eq!(CapacityCounts::new(1, 2, 2).shortfall(), 0);
    }

    #[test]
    fn test_record_planned_satisfies_demand() {
        let mut counts = CapacityCounts::new(3, 0, 0);
        counts.record_planned(grant(counts.shortfall(), 5));

        assert_eq!(counts.in_flight, 3);
        assert!(counts.is_satisfied());
    }

    #[test]
    fn test_grant_capped_by_limit() {
        assert_eq!(grant(3, 5), 3);
        assert_eq!(grant(3, 1), 1);
        assert_eq!(grant(4, 0), 0);
    }

    #[test]
    fn test_limit_budget_reads_once() {
        let mut budget = LimitBudget::new();
        let mut reads = 0;

        let first = budget.remaining_or_read(&"a", || {
            reads += 1;
            5
        });
        assert_eq!(first, 5);
        assert_eq!(budget.consume(&"a", 3), 2);

        let second = budget.remaining_or_read(&"a", || {
            reads += 1;
            100
        });
        assert_eq!(second, 2);
        assert_eq!(reads, 1);
    }

    #[test]
    fn test_pending_set_coalesces() {
        let mut pending = PendingSet::new();

        assert!(pending.mark("linux"));
        assert!(!pending.mark("linux"));
        assert!(pending.mark("windows"));
        assert_eq!(pending.len(), 2);

        assert!(pending.clear(&"linux"));
        assert!(!pending.clear(&"linux"));
        assert!(!pending.is_pending(&"linux"));
        assert!(pending.is_pending(&"windows"));
    }

    proptest! {
        #[test]
        fn prop_grants_never_exceed_limit(
            demand in 0u32..1_000,
            available in 0u32..100,
            in_flight in 0u32..100,
            limits in proptest::collection::vec(0u32..50, 1..6),
        ) {
            let mut counts = CapacityCounts::new(demand, available, in_flight);
            let mut budget = LimitBudget::new();
            let mut granted = 0u32;
            let total_limit: u32 = limits.iter().sum();

            for (idx, limit) in limits.iter().enumerate() {
                let remaining = budget.remaining_or_read(&idx, || *limit);
                let units = grant(counts.shortfall(), remaining);
                budget.consume(&idx, units);
                counts.record_planned(units);
                granted += units;
                prop_assert!(units <= *limit);
            }

            prop_assert!(granted <= total_limit);
            prop_assert!(counts.covered() >= available + in_flight);
            prop_assert_eq!(
                counts.shortfall(),
                demand.saturating_sub(available + in_flight + granted)
            );
        }
    }
}
