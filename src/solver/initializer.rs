//! initializer.rs
//! Starting allocation vectors: uniform, Dirichlet-random, and perturbed
//! uniform. Every initializer pins dispatch nodes at tau, keeps branch
//! siblings identical, and leaves summarized members null, so its output
//! already satisfies the invariants the search maintains.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Dirichlet, Distribution};

use crate::graph::NodeId;
use crate::program::{Allocations, ContractProgram, ProgramError, TimeAllocation};

/// Attempts the noise initializer spends per requested perturbation before
/// giving up; programs without a legal transfer would otherwise spin forever.
const ATTEMPTS_PER_PERTURBATION: usize = 64;

/// Build a vector by pinning dispatch nodes at tau, nulling summarized
/// members, and assigning `slot_time(id)` to everything else.
fn fill(program: &ContractProgram, mut slot_time: impl FnMut(NodeId) -> f64) -> Allocations {
    let tau = program.tau();
    let entries = program
        .dag()
        .nodes()
        .iter()
        .map(|node| {
            let time = if node.in_subtree {
                None
            } else if node.is_dispatch() {
                Some(tau)
            } else {
                Some(slot_time(node.id))
            };
            TimeAllocation::new(node.id, time)
        })
        .collect();
    Allocations::from_entries(entries)
}

/// Evenly spread the budget net of dispatch overhead across independent
/// slots. Branch siblings both receive the shared slot's value.
pub fn uniform(program: &ContractProgram) -> Result<Allocations, ProgramError> {
    let share = program.uniform_share(program.budget());
    Ok(fill(program, |_| share))
}

/// One random partition of the spendable budget drawn from a flat Dirichlet
/// over the independent slots: the higher-id member of each branch pair and
/// every dispatch node are left out of the draw, then reinserted as the
/// sibling's copy and the tau pin respectively.
pub fn dirichlet(program: &ContractProgram, rng: &mut StdRng) -> Result<Allocations, ProgramError> {
    let dag = program.dag();
    let tau = program.tau();
    let spendable = (program.budget() - tau * dag.dispatch_count() as f64).max(0.0);

    let mut draw_slots: Vec<NodeId> = Vec::new();
    for node in dag.nodes() {
        if node.in_subtree || node.is_dispatch() {
            continue;
        }
        if let Some(sibling) = dag.branch_sibling(node.id) {
            // The lower-id sibling draws for the pair.
            if sibling < node.id {
                continue;
            }
        }
        draw_slots.push(node.id);
    }

    let shares: Vec<f64> = match draw_slots.len() {
        0 => Vec::new(),
        1 => vec![1.0],
        n => {
            let simplex = Dirichlet::new(&vec![1.0; n])
                .map_err(|e| ProgramError::PartitionDraw { reason: e.to_string() })?;
            simplex.sample(rng)
        }
    };
    let drawn: BTreeMap<NodeId, f64> =
        draw_slots.into_iter().zip(shares).map(|(id, s)| (id, s * spendable)).collect();

    Ok(fill(program, |id| {
        if let Some(&time) = drawn.get(&id) {
            time
        } else if let Some(&time) = dag.branch_sibling(id).and_then(|sib| drawn.get(&sib)) {
            time
        } else {
            0.0
        }
    }))
}

/// Start from the uniform vector, then apply `perturbations` random pairwise
/// transfers of magnitude below `bound`, under the same branch-symmetry and
/// non-negativity rules the search follows. Illegal draws are skipped; if no
/// legal transfer exists the vector is returned with fewer perturbations
/// applied.
pub fn uniform_with_noise(
    program: &ContractProgram,
    rng: &mut StdRng,
    bound: f64,
    perturbations: usize,
) -> Result<Allocations, ProgramError> {
    let mut allocations = uniform(program)?;
    if bound <= 0.0 || perturbations == 0 {
        return Ok(allocations);
    }

    let dag = program.dag();
    let slots: Vec<NodeId> = dag
        .nodes()
        .iter()
        .filter(|n| !n.in_subtree && !n.is_dispatch())
        .map(|n| n.id)
        .collect();
    if slots.len() < 2 {
        return Ok(allocations);
    }

    let mut accepted = 0usize;
    let mut attempts = 0usize;
    let budget = perturbations.saturating_mul(ATTEMPTS_PER_PERTURBATION);
    while accepted < perturbations && attempts < budget {
        attempts += 1;
        let donor = slots[rng.gen_range(0..slots.len())];
        let recipient = slots[rng.gen_range(0..slots.len())];
        if donor == recipient {
            continue;
        }
        // Siblings of one conditional move in lock-step, never against each
        // other.
        if dag.branch_sibling(donor) == Some(recipient) {
            continue;
        }
        let amount = rng.gen_range(0.0..bound);
        let Some(donor_time) = allocations.time(donor) else { continue };
        if donor_time - amount < 0.0 {
            continue;
        }

        allocations.set_time(donor, Some(donor_time - amount));
        if let Some(sibling) = dag.branch_sibling(donor) {
            if let Some(t) = allocations.time(sibling) {
                allocations.set_time(sibling, Some(t - amount));
            }
        }
        if let Some(t) = allocations.time(recipient) {
            allocations.set_time(recipient, Some(t + amount));
        }
        if let Some(sibling) = dag.branch_sibling(recipient) {
            if let Some(t) = allocations.time(sibling) {
                allocations.set_time(sibling, Some(t + amount));
            }
        }
        accepted += 1;
    }
    Ok(allocations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ConditionalExpression, ProgramDag, ProgramNode};
    use crate::profile::{PerformanceProfile, ProfileConfig, ProfileStore};
    use crate::program::{ProgramConfig, SubprogramKind};
    use rand::SeedableRng;
    use std::sync::Arc;

    fn contract(id: u32, parents: &[u32]) -> ProgramNode {
        ProgramNode::contract(NodeId(id), parents.iter().map(|&p| NodeId(p)).collect())
    }

    fn empty_profile() -> Arc<PerformanceProfile> {
        Arc::new(PerformanceProfile::new(ProfileStore::new(), ProfileConfig::default()))
    }

    fn program_over(dag: ProgramDag, budget: f64) -> ContractProgram {
        let config = ProgramConfig { budget, ..ProgramConfig::default() };
        ContractProgram::new(0, dag, empty_profile(), config).unwrap()
    }

    fn leaf_branch(id: u32, kind: SubprogramKind) -> Box<ContractProgram> {
        let dag = ProgramDag::new(vec![contract(id, &[])], NodeId(id)).unwrap();
        let config = ProgramConfig { subprogram_kind: Some(kind), ..ProgramConfig::default() };
        Box::new(ContractProgram::new(id, dag, empty_profile(), config).unwrap())
    }

    /// Flat conditional: 4 -> conditional 3 -> branches 1, 2 -> root 0.
    fn flat_conditional(budget: f64) -> ContractProgram {
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
        program_over(ProgramDag::new(nodes, NodeId(0)).unwrap(), budget)
    }

    /// Sum counting each branch pair once and skipping dispatch pins.
    fn spendable_sum(program: &ContractProgram, allocations: &Allocations) -> f64 {
        let dag = program.dag();
        allocations
            .non_null()
            .filter(|(id, _)| {
                let node = dag.node(*id).unwrap();
                if node.is_dispatch() {
                    return false;
                }
                match dag.branch_sibling(*id) {
                    Some(sibling) => *id < sibling,
                    None => true,
                }
            })
            .map(|(_, t)| t)
            .sum()
    }

    #[test]
    fn test_uniform_single_node_receives_whole_budget() {
        let dag = ProgramDag::new(vec![contract(0, &[])], NodeId(0)).unwrap();
        let program = program_over(dag, 3.0);
        let allocations = uniform(&program).unwrap();
        assert_eq!(allocations.time(NodeId(0)), Some(3.0));
        assert!((allocations.allocated_total(program.dag()) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_uniform_balanced_binary_tree_shares_evenly() {
        let nodes = vec![
            contract(0, &[1, 2]),
            contract(1, &[3, 4]),
            contract(2, &[5, 6]),
            contract(3, &[]),
            contract(4, &[]),
            contract(5, &[]),
            contract(6, &[]),
        ];
        let program = program_over(ProgramDag::new(nodes, NodeId(0)).unwrap(), 10.0);
        let allocations = uniform(&program).unwrap();
        for id in 0..7 {
            let t = allocations.time(NodeId(id)).unwrap();
            assert!((t - 10.0 / 7.0).abs() < 1e-9);
        }
        assert!((allocations.allocated_total(program.dag()) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_uniform_pins_dispatch_and_pairs_branches() {
        let program = flat_conditional(10.0);
        let allocations = uniform(&program).unwrap();
        // Three independent slots share 10 - tau.
        let share = (10.0 - 0.1) / 3.0;
        assert!((allocations.time(NodeId(0)).unwrap() - share).abs() < 1e-9);
        assert_eq!(allocations.time(NodeId(1)), allocations.time(NodeId(2)));
        assert_eq!(allocations.time(NodeId(3)), Some(0.1));
        assert!((allocations.allocated_total(program.dag()) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_dirichlet_partitions_spendable_budget() {
        let program = flat_conditional(10.0);
        let mut rng = StdRng::seed_from_u64(7);
        let allocations = dirichlet(&program, &mut rng).unwrap();

        assert_eq!(allocations.len(), program.dag().order());
        assert_eq!(allocations.time(NodeId(1)), allocations.time(NodeId(2)));
        assert_eq!(allocations.time(NodeId(3)), Some(0.1));
        for (_, t) in allocations.non_null() {
            assert!(t >= 0.0);
        }
        // The drawn partition spends exactly budget - tau.
        assert!((spendable_sum(&program, &allocations) - 9.9).abs() < 1e-9);
        assert!((allocations.allocated_total(program.dag()) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_dirichlet_is_reproducible_per_seed() {
        let program = flat_conditional(10.0);
        let first = dirichlet(&program, &mut StdRng::seed_from_u64(11)).unwrap();
        let second = dirichlet(&program, &mut StdRng::seed_from_u64(11)).unwrap();
        let other = dirichlet(&program, &mut StdRng::seed_from_u64(12)).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn test_noise_keeps_conservation_and_symmetry() {
        let program = flat_conditional(10.0);
        let mut rng = StdRng::seed_from_u64(3);
        let noisy = uniform_with_noise(&program, &mut rng, 0.5, 5).unwrap();

        assert_eq!(noisy.time(NodeId(1)), noisy.time(NodeId(2)));
        assert_eq!(noisy.time(NodeId(3)), Some(0.1));
        for (_, t) in noisy.non_null() {
            assert!(t >= -1e-12);
        }
        assert!((noisy.allocated_total(program.dag()) - 10.0).abs() < 1e-9);
        assert_ne!(noisy, uniform(&program).unwrap());
    }

    #[test]
    fn test_noise_with_zero_perturbations_is_uniform() {
        let program = flat_conditional(10.0);
        let mut rng = StdRng::seed_from_u64(3);
        let noisy = uniform_with_noise(&program, &mut rng, 0.5, 0).unwrap();
        assert_eq!(noisy, uniform(&program).unwrap());
    }

    #[test]
    fn test_noise_gives_up_without_legal_transfers() {
        // A single slot has no partner to trade with; the attempt budget
        // keeps this from spinning.
        let dag = ProgramDag::new(vec![contract(0, &[])], NodeId(0)).unwrap();
        let program = program_over(dag, 3.0);
        let mut rng = StdRng::seed_from_u64(3);
        let noisy = uniform_with_noise(&program, &mut rng, 0.5, 4).unwrap();
        assert_eq!(noisy, uniform(&program).unwrap());
    }
}
