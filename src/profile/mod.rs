//! Performance profiles: the persisted sample store, the query interface
//! over it, and the synthetic generator that produces both.
pub mod generator;
pub mod performance;
pub mod store;

pub use generator::{Generator, VelocityModel};
pub use performance::{ParentQualities, PerformanceProfile, ProfileConfig, QualitySamples};
pub use store::{quantize, time_key, NodeRecord, ProfileError, ProfileStore};
