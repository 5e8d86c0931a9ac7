//! Id types for the provisioner.

use crate::define_id;

define_id!(
    /// A unit of pending work waiting for capacity.
    WorkItemId,
    "wi"
);

define_id!(
    /// A registered capacity provider (a cloud).
    ProviderId,
    "prov"
);

define_id!(
    /// Capacity a provider has accepted a request for but not yet delivered.
    PlannedCapacityId,
    "pcap"
);

define_id!(
    /// One review cycle, used to correlate log lines and events.
    ReviewId,
    "rev"
);
