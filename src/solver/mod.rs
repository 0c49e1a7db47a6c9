//! Builds starting allocation vectors and improves them by hill climbing.
pub mod hill_climbing;
pub mod initializer;

pub use hill_climbing::{SearchIteration, SearchOptions, SearchReport};
