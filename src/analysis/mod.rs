//! Utilities layered over the core search: reachability queries and the
//! random-restart harness.

pub mod restarts;
pub mod topology;

pub use restarts::{RestartHarness, RestartOutcome, RestartStrategy};
