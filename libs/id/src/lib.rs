//! # nodelay-id
//!
//! Typed identifiers used by the provisioner.
//!
//! Every id is a prefixed ULID, `{prefix}_{ulid}`:
//!
//! - `wi_01HV4Z2WQXKJNM8GPQY6VBKC3D` (work item)
//! - `prov_01HV4Z3MXNKPQR9HSTZ7WCLD4E` (capacity provider)
//! - `pcap_01HV4Z4NYPLTRS0JTUA8XDME5F` (planned capacity)
//!
//! The prefix keeps a work item id from being passed where a provider id is
//! expected, and ULIDs sort by creation time, which gives first-fit ordering
//! over work items for free.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
