//! Structural rules over a program DAG: every member must feed the root,
//! dispatch nodes must expose their subprogram members consistently, and
//! nested programs must carry the role they are mounted in.

use crate::graph::{ExpressionKind, NodeId, ProgramDag, ProgramNode};
use crate::program::SubprogramKind;
use crate::validation::error::{ValidationError, ValidationErrorType};
use std::collections::HashSet;

/// How one subprogram surfaces in the DAG that owns its dispatch node.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Exposure {
    /// A single member inlined as a plain slot, wired as the dispatch
    /// node's child.
    Flat,
    /// Every member summarized as a subtree node, allocated by the
    /// subprogram's own vector.
    Deep,
}

/// Every member's result must be able to flow into the root. `reachable` is
/// the dependency closure of the root, computed once per DAG.
pub(crate) fn validate_reachability(
    node: &ProgramNode,
    reachable: &HashSet<NodeId>,
) -> Option<ValidationError> {
    if reachable.contains(&node.id) {
        return None;
    }
    Some(ValidationError::at(
        node.id,
        ValidationErrorType::RootUnreachable,
        format!(
            "node {} cannot reach the root; its result is never consumed",
            node.id
        ),
    ))
}

/// A dispatch node must surface each subprogram either as one inlined branch
/// head or as summarized subtree members, and a conditional's two branches
/// must agree on which.
pub(crate) fn validate_dispatch_exposure(
    dag: &ProgramDag,
    node: &ProgramNode,
) -> Option<ValidationError> {
    if !node.is_dispatch() {
        return None;
    }

    let mut exposures = Vec::new();
    for subprogram in node.kind.subprograms() {
        let inlined: Vec<NodeId> = dag
            .nodes()
            .iter()
            .filter(|n| !n.in_subtree && subprogram.contains_node(n.id))
            .map(|n| n.id)
            .collect();
        match inlined.as_slice() {
            [] => exposures.push(Exposure::Deep),
            [head] if node.children.contains(head) => exposures.push(Exposure::Flat),
            [head] => {
                return Some(ValidationError::at(
                    node.id,
                    ValidationErrorType::BranchArity,
                    format!(
                        "inlined head {} of program {} is not wired as a child of dispatch node {}",
                        head,
                        subprogram.id(),
                        node.id
                    ),
                ));
            }
            many => {
                return Some(ValidationError::at(
                    node.id,
                    ValidationErrorType::BranchArity,
                    format!(
                        "dispatch node {} inlines {} members of program {}; expected one branch head or none",
                        node.id,
                        many.len(),
                        subprogram.id()
                    ),
                ));
            }
        }
    }

    if exposures.windows(2).any(|pair| pair[0] != pair[1]) {
        return Some(ValidationError::at(
            node.id,
            ValidationErrorType::BranchArity,
            format!(
                "dispatch node {} mixes an inlined branch head with a summarized branch",
                node.id
            ),
        ));
    }
    None
}

/// Each nested program's role tag must match the position it is mounted in.
pub(crate) fn validate_subprogram_roles(node: &ProgramNode) -> Option<ValidationError> {
    let mounts = match &node.kind {
        ExpressionKind::Contract => return None,
        ExpressionKind::Conditional(expr) => vec![
            (expr.on_true.as_ref(), SubprogramKind::TrueBranch),
            (expr.on_false.as_ref(), SubprogramKind::FalseBranch),
        ],
        ExpressionKind::Loop(expr) => vec![(expr.body.as_ref(), SubprogramKind::LoopBody)],
    };

    for (subprogram, role) in mounts {
        if subprogram.subprogram_kind() != Some(role) {
            let position = match role {
                SubprogramKind::TrueBranch => "true branch",
                SubprogramKind::FalseBranch => "false branch",
                SubprogramKind::LoopBody => "loop body",
            };
            return Some(ValidationError::at(
                node.id,
                ValidationErrorType::SubprogramRole,
                format!(
                    "program {} mounted as the {} of node {} is tagged {:?}",
                    subprogram.id(),
                    position,
                    node.id,
                    subprogram.subprogram_kind()
                ),
            ));
        }
    }
    None
}

/// A loop's iteration bound must cover at least one pass over its body.
pub(crate) fn validate_loop_bound(node: &ProgramNode) -> Option<ValidationError> {
    let ExpressionKind::Loop(expr) = &node.kind else {
        return None;
    };
    if expr.iterations >= 1 {
        return None;
    }
    Some(ValidationError::at(
        node.id,
        ValidationErrorType::LoopBound,
        format!("loop node {} has a zero iteration bound", node.id),
    ))
}
