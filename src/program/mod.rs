//! Contract programs and their time-allocation vectors.

pub mod allocation;
pub mod contract_program;

pub use allocation::{Allocations, TimeAllocation};
pub use contract_program::{
    ContractProgram, ExpectedUtilityType, ProgramConfig, ProgramError, SubprogramKind,
};
