//! generator.rs
//! Synthetic performance profiles: per-instance quality curves
//! q(t) = 1 - e^(-c*t) sampled on the profile grid and pooled into a store.

use super::performance::ProfileConfig;
use super::store::{time_key, NodeRecord, ProfileError, ProfileStore};
use crate::graph::{ExpressionKind, NodeId, ProgramDag};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Gamma};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// How per-instance curve velocities are drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VelocityModel {
    /// c ~ Gamma(shape, scale).
    Gamma { shape: f64, scale: f64 },
    /// c ~ U(low, high). Keeps velocities bounded away from zero so
    /// qualities do not collapse toward a zero utility.
    Uniform { low: f64, high: f64 },
}

impl Default for VelocityModel {
    fn default() -> Self {
        Self::Gamma { shape: 1.0, scale: 1.0 }
    }
}

/// Builds synthetic profile stores for a program tree.
///
/// Every contract node gets `instances` sampled curves; dispatch nodes get
/// no record since no profile query ever targets them. Velocities are drawn
/// sequentially from the caller's rng (reproducible per seed); the curve
/// simulation itself runs in parallel across nodes.
#[derive(Debug, Clone)]
pub struct Generator {
    pub instances: usize,
    pub velocity: VelocityModel,
    /// Per-node velocity pins; every instance of a pinned node uses the
    /// given velocity instead of a draw.
    pub overrides: BTreeMap<NodeId, f64>,
}

impl Generator {
    pub fn new(instances: usize) -> Self {
        Self { instances, velocity: VelocityModel::default(), overrides: BTreeMap::new() }
    }

    pub fn with_velocity(mut self, velocity: VelocityModel) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn override_velocity(mut self, id: NodeId, velocity: f64) -> Self {
        self.overrides.insert(id, velocity);
        self
    }

    pub fn generate(
        &self,
        dag: &ProgramDag,
        config: &ProfileConfig,
        rng: &mut StdRng,
    ) -> Result<ProfileStore, ProfileError> {
        enum Sampler {
            Gamma(Gamma<f64>),
            Uniform { low: f64, high: f64 },
        }
        let sampler = match self.velocity {
            VelocityModel::Gamma { shape, scale } => Sampler::Gamma(
                Gamma::new(shape, scale)
                    .map_err(|e| ProfileError::InvalidVelocity { reason: e.to_string() })?,
            ),
            VelocityModel::Uniform { low, high } => {
                if !(low < high) || low < 0.0 {
                    return Err(ProfileError::InvalidVelocity {
                        reason: format!("uniform bounds [{low}, {high}) are not ordered"),
                    });
                }
                Sampler::Uniform { low, high }
            }
        };

        // 1. Collect contract nodes across the whole program tree.
        let mut targets: BTreeMap<NodeId, Target> = BTreeMap::new();
        collect_targets(dag, None, &mut targets);

        // 2. Draw velocities in ascending id order, loop-group heads first,
        //    so results are reproducible per seed. Copies of a loop body
        //    reuse the head's draws: setup cost is charged once, on the
        //    first iteration.
        let draw = |rng: &mut StdRng| match &sampler {
            Sampler::Gamma(g) => g.sample(rng),
            Sampler::Uniform { low, high } => rng.gen_range(*low..*high),
        };
        let mut velocities: BTreeMap<NodeId, Vec<f64>> = BTreeMap::new();
        for (&id, target) in &targets {
            if target.loop_group.is_some() && !target.is_loop_head {
                continue;
            }
            let v = if let Some(&pinned) = self.overrides.get(&id) {
                vec![pinned; self.instances]
            } else {
                (0..self.instances).map(|_| draw(rng)).collect()
            };
            velocities.insert(id, v);
        }
        for (&id, target) in &targets {
            if velocities.contains_key(&id) {
                continue;
            }
            if let Some(&pinned) = self.overrides.get(&id) {
                velocities.insert(id, vec![pinned; self.instances]);
                continue;
            }
            let head = target
                .loop_group
                .and_then(|group| {
                    targets
                        .values()
                        .find(|t| t.loop_group == Some(group) && t.is_loop_head)
                })
                .map(|t| t.id);
            let v = match head.and_then(|h| velocities.get(&h)) {
                Some(shared) => shared.clone(),
                None => (0..self.instances).map(|_| draw(rng)).collect(),
            };
            velocities.insert(id, v);
        }

        // 3. Simulate curves in parallel; each task owns its target's data.
        let grid = config.time_grid();
        let records: Vec<(NodeId, NodeRecord)> = targets
            .par_iter()
            .map(|(&id, target)| {
                let v = &velocities[&id];
                let mut qualities = BTreeMap::new();
                for &t in &grid {
                    let samples: Vec<f64> = v.iter().map(|&c| 1.0 - (-c * t).exp()).collect();
                    qualities.insert(time_key(t, config.time_step_size), samples);
                }
                (id, NodeRecord { qualities, parents: target.parents.clone() })
            })
            .collect();

        let mut store = ProfileStore::new();
        for (id, record) in records {
            store.insert(id, record);
        }
        Ok(store)
    }
}

struct Target {
    id: NodeId,
    parents: Vec<u32>,
    /// Id of the loop node whose body this node belongs to, if any.
    loop_group: Option<NodeId>,
    is_loop_head: bool,
}

fn collect_targets(dag: &ProgramDag, group: Option<NodeId>, out: &mut BTreeMap<NodeId, Target>) {
    for node in dag.nodes() {
        // Outer copies of subtree members are collected through their
        // subprogram's own walk instead.
        if node.in_subtree {
            continue;
        }
        match &node.kind {
            ExpressionKind::Contract => {
                let entry = out.entry(node.id).or_insert_with(|| Target {
                    id: node.id,
                    parents: node.parents.iter().map(|p| p.0).collect(),
                    loop_group: group,
                    is_loop_head: node.first_loop_iteration,
                });
                // Flat members appear both in the outer DAG and in their
                // branch/body DAG; merge the loop-group view.
                if entry.loop_group.is_none() {
                    entry.loop_group = group;
                }
                entry.is_loop_head |= node.first_loop_iteration;
            }
            ExpressionKind::Conditional(expr) => {
                collect_targets(expr.on_true.dag(), group, out);
                collect_targets(expr.on_false.dag(), group, out);
            }
            ExpressionKind::Loop(expr) => {
                collect_targets(expr.body.dag(), Some(node.id), out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ConditionalExpression, ProgramNode};
    use crate::profile::PerformanceProfile;
    use crate::program::{ContractProgram, ProgramConfig};
    use rand::SeedableRng;
    use std::sync::Arc;

    fn contract(id: u32, parents: &[u32]) -> ProgramNode {
        ProgramNode::contract(NodeId(id), parents.iter().map(|&p| NodeId(p)).collect())
    }

    fn chain() -> ProgramDag {
        ProgramDag::new(vec![contract(0, &[1]), contract(1, &[])], NodeId(0)).unwrap()
    }

    fn empty_profile() -> Arc<PerformanceProfile> {
        Arc::new(PerformanceProfile::new(ProfileStore::new(), ProfileConfig::default()))
    }

    fn leaf_program(id: u32) -> Box<ContractProgram> {
        let dag = ProgramDag::new(vec![contract(id, &[])], NodeId(id)).unwrap();
        Box::new(ContractProgram::new(id, dag, empty_profile(), ProgramConfig::default()).unwrap())
    }

    #[test]
    fn test_generate_covers_contract_nodes_only() {
        let expr = ConditionalExpression { on_true: leaf_program(1), on_false: leaf_program(2) };
        let nodes = vec![
            contract(0, &[1, 2]),
            contract(1, &[3]),
            contract(2, &[3]),
            ProgramNode::conditional(NodeId(3), vec![NodeId(4)], expr),
            contract(4, &[]),
        ];
        let dag = ProgramDag::new(nodes, NodeId(0)).unwrap();
        let config = ProfileConfig::default();
        let mut rng = StdRng::seed_from_u64(7);

        let store = Generator::new(5).generate(&dag, &config, &mut rng).unwrap();

        for id in [0u32, 1, 2, 4] {
            assert!(store.has_record(NodeId(id)), "node {id} missing");
        }
        assert!(!store.has_record(NodeId(3)), "dispatch node must have no record");
        let samples = store.samples(NodeId(0), "0.1").unwrap();
        assert_eq!(samples.len(), 5);
    }

    #[test]
    fn test_curves_are_monotone_per_instance() {
        let config = ProfileConfig::default();
        let mut rng = StdRng::seed_from_u64(11);
        let store = Generator::new(3).generate(&chain(), &config, &mut rng).unwrap();

        let record = store.record(NodeId(1)).unwrap();
        for instance in 0..3 {
            let mut previous = -1.0;
            for t in config.time_grid() {
                let key = time_key(t, config.time_step_size);
                let q = record.qualities[&key][instance];
                assert!(q >= previous, "quality decreased at t={t}");
                assert!((0.0..=1.0).contains(&q));
                previous = q;
            }
        }
    }

    #[test]
    fn test_generation_is_reproducible_per_seed() {
        let config = ProfileConfig::default();
        let a = Generator::new(4)
            .generate(&chain(), &config, &mut StdRng::seed_from_u64(42))
            .unwrap();
        let b = Generator::new(4)
            .generate(&chain(), &config, &mut StdRng::seed_from_u64(42))
            .unwrap();
        assert_eq!(a.record(NodeId(0)).unwrap(), b.record(NodeId(0)).unwrap());
        assert_eq!(a.record(NodeId(1)).unwrap(), b.record(NodeId(1)).unwrap());
    }

    #[test]
    fn test_override_pins_node_velocity() {
        let config = ProfileConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let store = Generator::new(2)
            .override_velocity(NodeId(1), 10000.0)
            .generate(&chain(), &config, &mut rng)
            .unwrap();

        // A huge velocity saturates the curve after a single step.
        let samples = store.samples(NodeId(1), "0.1").unwrap();
        assert!(samples.iter().all(|&q| q > 0.999));
    }

    #[test]
    fn test_uniform_velocity_rejects_bad_bounds() {
        let config = ProfileConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let err = Generator::new(2)
            .with_velocity(VelocityModel::Uniform { low: 0.9, high: 0.05 })
            .generate(&chain(), &config, &mut rng)
            .unwrap_err();
        assert!(matches!(err, ProfileError::InvalidVelocity { .. }));
    }

    #[test]
    fn test_loop_body_copies_share_the_head_draw() {
        // Loop body: head 2 (first iteration) feeding its copy 3.
        let mut head = contract(2, &[]);
        head.first_loop_iteration = true;
        let body_dag = ProgramDag::new(vec![head, contract(3, &[2])], NodeId(3)).unwrap();
        let body = Box::new(
            ContractProgram::new(9, body_dag, empty_profile(), ProgramConfig::default()).unwrap(),
        );
        let nodes = vec![
            contract(0, &[1]),
            ProgramNode::bounded_loop(
                NodeId(1),
                vec![],
                crate::graph::LoopExpression { iterations: 2, body },
            ),
        ];
        let dag = ProgramDag::new(nodes, NodeId(0)).unwrap();

        let config = ProfileConfig::default();
        let mut rng = StdRng::seed_from_u64(5);
        let store = Generator::new(3).generate(&dag, &config, &mut rng).unwrap();

        assert_eq!(
            store.record(NodeId(2)).unwrap().qualities,
            store.record(NodeId(3)).unwrap().qualities
        );
    }
}
