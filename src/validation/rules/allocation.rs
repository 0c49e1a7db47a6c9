//! Rules over a time-allocation vector: alignment with its DAG,
//! non-negativity, branch symmetry, subtree nulls and budget conservation.

use crate::graph::{NodeId, ProgramDag, ProgramNode};
use crate::program::{Allocations, TimeAllocation};
use crate::validation::error::{ValidationError, ValidationErrorType};

/// Allowed drift between an allocated total and the program budget.
pub(crate) const BUDGET_TOLERANCE: f64 = 1e-6;

/// Allowed drift between the two slots of a shared branch pair.
pub(crate) const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// The vector must carry exactly one slot per DAG member. Everything else
/// in this module indexes by id, so a misaligned vector fails fast.
pub(crate) fn validate_alignment(
    dag: &ProgramDag,
    allocations: &Allocations,
) -> Option<ValidationError> {
    for entry in allocations.iter() {
        if !dag.has_node(entry.node_id) {
            return Some(ValidationError::at(
                entry.node_id,
                ValidationErrorType::VectorMisaligned,
                format!("vector holds a slot for {}, which is not a member", entry.node_id),
            ));
        }
    }
    if allocations.len() != dag.order() {
        return Some(ValidationError::global(
            ValidationErrorType::VectorMisaligned,
            format!(
                "vector has {} slots for {} members",
                allocations.len(),
                dag.order()
            ),
        ));
    }
    None
}

/// Time can be unassigned but never negative.
pub(crate) fn validate_non_negative(entry: &TimeAllocation) -> Option<ValidationError> {
    let time = entry.time?;
    if time >= 0.0 {
        return None;
    }
    Some(ValidationError::at(
        entry.node_id,
        ValidationErrorType::NegativeAllocation,
        format!("node {} holds negative time {}", entry.node_id, time),
    ))
}

/// A subtree member's time belongs to its subprogram's vector; its outer
/// slot must stay null.
pub(crate) fn validate_subtree_null(
    node: &ProgramNode,
    allocations: &Allocations,
) -> Option<ValidationError> {
    if !node.in_subtree {
        return None;
    }
    let time = allocations.time(node.id)?;
    Some(ValidationError::at(
        node.id,
        ValidationErrorType::UnexpectedAllocation,
        format!(
            "subtree member {} holds time {} in the outer vector",
            node.id, time
        ),
    ))
}

/// Both heads of a shared branch pair must hold the same time. Reported at
/// the lower id so one broken pair yields one error.
pub(crate) fn validate_branch_symmetry(
    allocations: &Allocations,
    pair: (NodeId, NodeId),
) -> Option<ValidationError> {
    let (head_true, head_false) = pair;
    let reported = head_true.min(head_false);
    match (allocations.time(head_true), allocations.time(head_false)) {
        (Some(a), Some(b)) if (a - b).abs() <= SYMMETRY_TOLERANCE => None,
        (None, None) => None,
        (a, b) => Some(ValidationError::at(
            reported,
            ValidationErrorType::BranchAsymmetry,
            format!(
                "branch heads {} and {} hold different times ({:?} vs {:?})",
                head_true, head_false, a, b
            ),
        )),
    }
}

/// An allocated vector must spend the budget exactly, counting each branch
/// pair once and the tau pre-charge on dispatch slots. A vector that has
/// not been initialized yet is exempt.
pub(crate) fn validate_conservation(
    dag: &ProgramDag,
    budget: f64,
    allocations: &Allocations,
) -> Option<ValidationError> {
    if allocations.non_null().next().is_none() {
        return None;
    }
    let total = allocations.allocated_total(dag);
    if (total - budget).abs() <= BUDGET_TOLERANCE {
        return None;
    }
    Some(ValidationError::global(
        ValidationErrorType::BudgetMismatch,
        format!("vector allocates {} of a {} budget", total, budget),
    ))
}
