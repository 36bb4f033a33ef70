#![deny(missing_docs)]
//! Gridmesh API contains the gridmesh module traits and the basic types
//! required to define the api of those traits.
//!
//! The production implementations of these traits live in the
//! gridmesh_core and gridmesh_ring crates.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub mod affinity;
pub mod balance;
pub mod builder;
pub mod config;
pub mod discovery;
pub mod handler;

mod error;
pub use error::*;

pub mod id;
pub use id::{NodeId, VersionSource, VersionedId};

mod timestamp;
pub use timestamp::*;

pub mod node;
pub use node::{NodeInfo, NodeMetrics, ATTR_DATA_NODE};

pub mod topology;
pub use topology::*;

mod future;
pub use future::*;
