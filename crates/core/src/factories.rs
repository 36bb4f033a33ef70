//! Factories included in gridmesh_core.

mod ident_affinity_mapper;
pub use ident_affinity_mapper::*;

mod partitioned_affinity;
pub use partitioned_affinity::*;

mod round_robin_balance;
pub use round_robin_balance::*;
