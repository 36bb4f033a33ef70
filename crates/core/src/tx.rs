//! Distributed transaction mapping.
//!
//! A transaction's entry set is partitioned across the nodes that own
//! each key, per the affinity function, against the topology snapshot
//! captured once at transaction start. Entries are grouped by primary
//! owner, with backup owners recorded separately for replication.

mod entry;
pub use entry::*;

mod mapping;
pub use mapping::*;

mod mappings;
pub use mappings::*;
