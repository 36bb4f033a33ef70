#![deny(missing_docs)]
//! Gridmesh core module implementations.
//!
//! - affinity: identity affinity mapper and the partitioned
//!   (rendezvous-hash) affinity function
//! - tx: distributed transaction mapping over an affinity-resolved
//!   topology snapshot
//! - balance: round-robin default load balancer

pub mod factories;

pub mod tx;
