//! Error types for the validation module.

use crate::graph::NodeId;

/// The specific category of a validation error, kept machine-matchable so
/// callers never have to parse the message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorType {
    /// A member whose result can never flow into the root.
    RootUnreachable,
    /// A dispatch node exposing its subprogram members inconsistently.
    BranchArity,
    /// A nested program mounted in a position that contradicts its role tag.
    SubprogramRole,
    /// A loop with a zero iteration bound.
    LoopBound,
    /// An allocation vector that does not line up with its DAG.
    VectorMisaligned,
    /// A slot holding negative time.
    NegativeAllocation,
    /// A conditional branch pair whose heads hold different times.
    BranchAsymmetry,
    /// A subtree-member slot holding time its subprogram owns.
    UnexpectedAllocation,
    /// An allocated vector whose total drifts from the program budget.
    BudgetMismatch,
}

/// A structured report from one validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The node the error was detected at, when the rule is node-local.
    /// Vector-level findings such as [`ValidationErrorType::BudgetMismatch`]
    /// carry no node.
    pub node_id: Option<NodeId>,
    /// The category of the error.
    pub error_type: ValidationErrorType,
    /// A human-readable message explaining the error.
    pub message: String,
}

impl ValidationError {
    pub(crate) fn at(node_id: NodeId, error_type: ValidationErrorType, message: String) -> Self {
        Self { node_id: Some(node_id), error_type, message }
    }

    pub(crate) fn global(error_type: ValidationErrorType, message: String) -> Self {
        Self { node_id: None, error_type, message }
    }
}
