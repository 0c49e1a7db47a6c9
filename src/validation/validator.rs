//! The central validator that walks a program tree and applies every rule.

use super::error::ValidationError;
use super::rules::{allocation, structure};
use crate::analysis::topology;
use crate::program::{Allocations, ContractProgram};

/// Applies the structural and allocation rules to one program.
///
/// Construction already rejects cycles, duplicate ids and unknown parents,
/// so the rules here cover the shapes a well-formed DAG can still get
/// wrong: unreachable members, lopsided dispatch wiring, mistagged nested
/// programs and vectors that drift from their program.
pub struct Validator<'a> {
    program: &'a ContractProgram,
}

impl<'a> Validator<'a> {
    pub fn new(program: &'a ContractProgram) -> Self {
        Self { program }
    }

    /// Checks the program shape here and in every nested program below.
    ///
    /// # Returns
    /// - `Ok(())` if no rule fires.
    /// - `Err(Vec<ValidationError>)` with every error discovered in the tree.
    pub fn validate_structure(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        collect_structure(self.program, &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Checks a candidate vector against this program's DAG and budget.
    /// Alignment failures mask everything else: the remaining rules index
    /// slots by id and would only echo the misalignment.
    pub fn validate_allocations(
        &self,
        allocations: &Allocations,
    ) -> Result<(), Vec<ValidationError>> {
        let dag = self.program.dag();
        if let Some(err) = allocation::validate_alignment(dag, allocations) {
            return Err(vec![err]);
        }

        let mut errors = Vec::new();
        for entry in allocations.iter() {
            if let Some(err) = allocation::validate_non_negative(entry) {
                errors.push(err);
            }
        }
        for node in dag.nodes() {
            if let Some(err) = allocation::validate_subtree_null(node, allocations) {
                errors.push(err);
            }
        }
        for pair in dag.branch_pairs() {
            if let Some(err) = allocation::validate_branch_symmetry(allocations, pair) {
                errors.push(err);
            }
        }
        if let Some(err) =
            allocation::validate_conservation(dag, self.program.budget(), allocations)
        {
            errors.push(err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Structure plus the committed vector in one pass. Nested programs are
    /// checked structurally only; their vectors are parked at zero between
    /// searches and are not held to conservation.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if let Err(mut found) = self.validate_structure() {
            errors.append(&mut found);
        }
        if let Err(mut found) = self.validate_allocations(self.program.allocations()) {
            errors.append(&mut found);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn collect_structure(program: &ContractProgram, errors: &mut Vec<ValidationError>) {
    let dag = program.dag();
    let reachable = topology::upstream_of(dag, &[dag.root()]);
    for node in dag.nodes() {
        if let Some(err) = structure::validate_reachability(node, &reachable) {
            errors.push(err);
        }
        if let Some(err) = structure::validate_dispatch_exposure(dag, node) {
            errors.push(err);
        }
        if let Some(err) = structure::validate_subprogram_roles(node) {
            errors.push(err);
        }
        if let Some(err) = structure::validate_loop_bound(node) {
            errors.push(err);
        }
    }
    for child in program.child_programs() {
        collect_structure(child, errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        ConditionalExpression, LoopExpression, NodeId, ProgramDag, ProgramNode,
    };
    use crate::profile::{PerformanceProfile, ProfileConfig, ProfileStore};
    use crate::program::{ProgramConfig, SubprogramKind, TimeAllocation};
    use crate::validation::error::ValidationErrorType;
    use std::sync::Arc;

    fn contract(id: u32, parents: &[u32]) -> ProgramNode {
        ProgramNode::contract(NodeId(id), parents.iter().map(|&p| NodeId(p)).collect())
    }

    fn test_profile() -> Arc<PerformanceProfile> {
        Arc::new(PerformanceProfile::new(
            ProfileStore::default(),
            ProfileConfig::default(),
        ))
    }

    fn program_over(dag: ProgramDag) -> ContractProgram {
        ContractProgram::new(0, dag, test_profile(), ProgramConfig::default()).unwrap()
    }

    fn leaf_branch(id: u32, kind: SubprogramKind) -> Box<ContractProgram> {
        let dag = ProgramDag::new(vec![contract(id, &[])], NodeId(id)).unwrap();
        let config = ProgramConfig { subprogram_kind: Some(kind), ..ProgramConfig::default() };
        Box::new(ContractProgram::new(id, dag, test_profile(), config).unwrap())
    }

    /// Flat conditional: 4 -> conditional 3 -> branches 1, 2 -> root 0.
    fn flat_conditional() -> ContractProgram {
        let expr = ConditionalExpression {
            on_true: leaf_branch(1, SubprogramKind::TrueBranch),
            on_false: leaf_branch(2, SubprogramKind::FalseBranch),
        };
        let nodes = vec![
            contract(0, &[1, 2]),
            contract(1, &[3]),
            contract(2, &[3]),
            ProgramNode::conditional(NodeId(3), vec![NodeId(4)], expr),
            contract(4, &[]),
        ];
        program_over(ProgramDag::new(nodes, NodeId(0)).unwrap())
    }

    /// Deep conditional: members 5 and 6 live in subprograms and appear in
    /// the outer DAG as subtree summaries feeding the dispatch node.
    fn deep_conditional() -> ContractProgram {
        let expr = ConditionalExpression {
            on_true: leaf_branch(5, SubprogramKind::TrueBranch),
            on_false: leaf_branch(6, SubprogramKind::FalseBranch),
        };
        let mut copy_true = contract(5, &[2]);
        copy_true.in_subtree = true;
        let mut copy_false = contract(6, &[2]);
        copy_false.in_subtree = true;
        let nodes = vec![
            contract(0, &[1]),
            ProgramNode::conditional(NodeId(1), vec![NodeId(5), NodeId(6)], expr),
            contract(2, &[]),
            copy_true,
            copy_false,
        ];
        program_over(ProgramDag::new(nodes, NodeId(0)).unwrap())
    }

    fn entries(slots: &[(u32, Option<f64>)]) -> Allocations {
        Allocations::from_entries(
            slots
                .iter()
                .map(|&(id, time)| TimeAllocation::new(NodeId(id), time))
                .collect(),
        )
    }

    #[test]
    fn test_fresh_and_initialized_programs_validate() {
        let mut program = flat_conditional();
        assert!(Validator::new(&program).validate().is_ok());

        program.initialize_uniform().unwrap();
        assert!(Validator::new(&program).validate().is_ok());
    }

    #[test]
    fn test_disconnected_member_fails_reachability() {
        let dag = ProgramDag::new(vec![contract(0, &[]), contract(1, &[])], NodeId(0)).unwrap();
        let program = program_over(dag);

        let errors = Validator::new(&program).validate_structure().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ValidationErrorType::RootUnreachable);
        assert_eq!(errors[0].node_id, Some(NodeId(1)));
    }

    #[test]
    fn test_mixed_branch_exposure_is_flagged() {
        // True branch inlined as node 1, false branch fully summarized.
        let expr = ConditionalExpression {
            on_true: leaf_branch(1, SubprogramKind::TrueBranch),
            on_false: leaf_branch(6, SubprogramKind::FalseBranch),
        };
        let nodes = vec![
            contract(0, &[1, 3]),
            contract(1, &[3]),
            ProgramNode::conditional(NodeId(3), vec![NodeId(4)], expr),
            contract(4, &[]),
        ];
        let program = program_over(ProgramDag::new(nodes, NodeId(0)).unwrap());

        let errors = Validator::new(&program).validate_structure().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ValidationErrorType::BranchArity);
        assert_eq!(errors[0].node_id, Some(NodeId(3)));
    }

    #[test]
    fn test_misrouted_inlined_head_is_flagged() {
        // Node 1 belongs to the true branch but does not consume the
        // dispatch node's output.
        let expr = ConditionalExpression {
            on_true: leaf_branch(1, SubprogramKind::TrueBranch),
            on_false: leaf_branch(6, SubprogramKind::FalseBranch),
        };
        let nodes = vec![
            contract(0, &[1, 3]),
            contract(1, &[4]),
            ProgramNode::conditional(NodeId(3), vec![NodeId(4)], expr),
            contract(4, &[]),
        ];
        let program = program_over(ProgramDag::new(nodes, NodeId(0)).unwrap());

        let errors = Validator::new(&program).validate_structure().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ValidationErrorType::BranchArity);
        assert!(errors[0].message.contains("not wired"));
    }

    #[test]
    fn test_role_mismatch_is_flagged() {
        let expr = ConditionalExpression {
            on_true: leaf_branch(1, SubprogramKind::LoopBody),
            on_false: leaf_branch(2, SubprogramKind::FalseBranch),
        };
        let nodes = vec![
            contract(0, &[1, 2]),
            contract(1, &[3]),
            contract(2, &[3]),
            ProgramNode::conditional(NodeId(3), vec![NodeId(4)], expr),
            contract(4, &[]),
        ];
        let program = program_over(ProgramDag::new(nodes, NodeId(0)).unwrap());

        let errors = Validator::new(&program).validate_structure().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ValidationErrorType::SubprogramRole);
        assert_eq!(errors[0].node_id, Some(NodeId(3)));
    }

    #[test]
    fn test_zero_iteration_loop_is_flagged() {
        let expr = LoopExpression {
            iterations: 0,
            body: leaf_branch(5, SubprogramKind::LoopBody),
        };
        let mut copy = contract(5, &[2]);
        copy.in_subtree = true;
        let nodes = vec![
            contract(0, &[1]),
            ProgramNode::bounded_loop(NodeId(1), vec![NodeId(5)], expr),
            contract(2, &[]),
            copy,
        ];
        let program = program_over(ProgramDag::new(nodes, NodeId(0)).unwrap());

        let errors = Validator::new(&program).validate_structure().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ValidationErrorType::LoopBound);
        assert_eq!(errors[0].node_id, Some(NodeId(1)));
    }

    #[test]
    fn test_structure_recurses_into_nested_programs() {
        // The true branch hides a zero-iteration loop one level down.
        let inner_loop = ProgramNode::bounded_loop(
            NodeId(5),
            Vec::new(),
            LoopExpression { iterations: 0, body: leaf_branch(9, SubprogramKind::LoopBody) },
        );
        let branch_dag = ProgramDag::new(vec![inner_loop], NodeId(5)).unwrap();
        let branch_config = ProgramConfig {
            subprogram_kind: Some(SubprogramKind::TrueBranch),
            ..ProgramConfig::default()
        };
        let on_true =
            Box::new(ContractProgram::new(5, branch_dag, test_profile(), branch_config).unwrap());

        let expr = ConditionalExpression {
            on_true,
            on_false: leaf_branch(6, SubprogramKind::FalseBranch),
        };
        let mut copy_true = contract(5, &[]);
        copy_true.in_subtree = true;
        let mut copy_false = contract(6, &[]);
        copy_false.in_subtree = true;
        let nodes = vec![
            contract(0, &[1]),
            ProgramNode::conditional(NodeId(1), vec![NodeId(5), NodeId(6)], expr),
            copy_true,
            copy_false,
        ];
        let program = program_over(ProgramDag::new(nodes, NodeId(0)).unwrap());

        let errors = Validator::new(&program).validate_structure().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ValidationErrorType::LoopBound);
        assert_eq!(errors[0].node_id, Some(NodeId(5)));
    }

    #[test]
    fn test_negative_time_is_flagged() {
        let program = flat_conditional();
        let vector = entries(&[
            (0, Some(7.6)),
            (1, Some(3.3)),
            (2, Some(3.3)),
            (3, Some(0.1)),
            (4, Some(-1.0)),
        ]);

        let errors = Validator::new(&program).validate_allocations(&vector).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ValidationErrorType::NegativeAllocation);
        assert_eq!(errors[0].node_id, Some(NodeId(4)));
    }

    #[test]
    fn test_branch_asymmetry_is_reported_once_at_the_lower_head() {
        let program = flat_conditional();
        let vector = entries(&[
            (0, Some(3.45)),
            (1, Some(3.0)),
            (2, Some(3.6)),
            (3, Some(0.1)),
            (4, Some(3.45)),
        ]);

        let errors = Validator::new(&program).validate_allocations(&vector).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ValidationErrorType::BranchAsymmetry);
        assert_eq!(errors[0].node_id, Some(NodeId(1)));
    }

    #[test]
    fn test_budget_drift_is_flagged_globally() {
        let program = flat_conditional();
        let vector = entries(&[
            (0, Some(4.3)),
            (1, Some(3.3)),
            (2, Some(3.3)),
            (3, Some(0.1)),
            (4, Some(3.3)),
        ]);

        let errors = Validator::new(&program).validate_allocations(&vector).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ValidationErrorType::BudgetMismatch);
        assert_eq!(errors[0].node_id, None);
    }

    #[test]
    fn test_unallocated_vector_is_exempt_from_conservation() {
        let program = flat_conditional();
        let vector = Allocations::unallocated(program.dag());
        assert!(Validator::new(&program).validate_allocations(&vector).is_ok());
    }

    #[test]
    fn test_subtree_slot_holding_time_is_flagged() {
        let program = deep_conditional();
        let vector = entries(&[
            (0, Some(4.0)),
            (1, Some(1.9)),
            (2, Some(3.1)),
            (5, Some(1.0)),
            (6, None),
        ]);

        let errors = Validator::new(&program).validate_allocations(&vector).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ValidationErrorType::UnexpectedAllocation);
        assert_eq!(errors[0].node_id, Some(NodeId(5)));
    }

    #[test]
    fn test_misaligned_vectors_fail_fast() {
        let program = flat_conditional();

        let short = entries(&[(0, Some(5.0)), (1, Some(2.0)), (2, Some(2.0)), (3, Some(0.1))]);
        let errors = Validator::new(&program).validate_allocations(&short).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ValidationErrorType::VectorMisaligned);
        assert_eq!(errors[0].node_id, None);

        let alien = entries(&[
            (0, Some(5.0)),
            (1, Some(2.0)),
            (2, Some(2.0)),
            (3, Some(0.1)),
            (9, Some(0.9)),
        ]);
        let errors = Validator::new(&program).validate_allocations(&alien).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].node_id, Some(NodeId(9)));
    }
}
