//! Metareasoning over contract programs: DAGs of anytime algorithms with
//! conditional and loop subprograms, scored by expected utility over
//! performance profiles and tuned by hill-climbing time-allocation search.
//!
//! The crate is plain Rust; the optional `python` feature adds a pyo3
//! `_core` extension module exposing the build-evaluate-search loop.

pub mod analysis;
pub mod display;
pub mod evaluation;
pub mod graph;
pub mod profile;
pub mod program;
pub mod solver;
pub mod validation;

#[cfg(feature = "python")]
pub mod bindings;

pub use analysis::{RestartHarness, RestartOutcome, RestartStrategy};
pub use evaluation::{Evaluator, InnerOverride, SubprogramAllocations};
pub use graph::{
    ConditionalExpression, ExpressionKind, GraphError, LoopExpression, NodeId, ProgramDag,
    ProgramNode,
};
pub use profile::{
    Generator, NodeRecord, PerformanceProfile, ProfileConfig, ProfileError, ProfileStore,
    VelocityModel,
};
pub use program::{
    Allocations, ContractProgram, ExpectedUtilityType, ProgramConfig, ProgramError,
    SubprogramKind, TimeAllocation,
};
pub use solver::{SearchIteration, SearchOptions, SearchReport};
pub use validation::{ValidationError, ValidationErrorType, Validator};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Confirms the compiled core is callable from Python.
#[cfg(feature = "python")]
#[pyfunction]
fn rust_core_version() -> &'static str {
    "0.1.0"
}

/// The `_core` Python module. The underscore marks it as the internal,
/// compiled component behind the Python package.
#[cfg(feature = "python")]
#[pymodule]
fn _core(_py: Python, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(rust_core_version, m)?)?;
    m.add_function(wrap_pyfunction!(bindings::python::generate_profile_store, m)?)?;
    m.add_class::<bindings::python::PyContractProgram>()?;
    Ok(())
}
