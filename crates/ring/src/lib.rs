#![deny(missing_docs)]
//! Tcp ring membership discovery for the gridmesh data grid.
//!
//! Members form a logical ring ordered by join sequence. Membership
//! messages circulate ring-wise, successor to successor, so every
//! topology change is observed by every member without any node
//! broadcasting to all others. The coordinator (the oldest live member)
//! is the single point that stamps topology changes, which gives all
//! members the same total order of changes regardless of message
//! arrival order.

mod config;
pub use config::*;

pub mod protocol;

mod state;
pub use state::*;

mod ring;
pub use ring::*;
