//! Expected-utility engines.

pub mod engine;

pub use engine::{Evaluator, InnerOverride, SubprogramAllocations};
