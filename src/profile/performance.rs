//! performance.rs
//! Query interface over a loaded profile store: sampled quality lists,
//! achievement probabilities, level masses, and parent-quality resolution.

use super::store::{quantize, time_key, ProfileError, ProfileStore};
use crate::graph::{ExpressionKind, NodeId, ProgramDag, ProgramNode};
use crate::program::Allocations;
use smallvec::SmallVec;
use std::path::Path;

/// Pooled quality samples for one query.
pub type QualitySamples = SmallVec<[f64; 16]>;
/// Realized qualities of a node's parents, in parent-list order.
pub type ParentQualities = SmallVec<[f64; 8]>;

/// Grid and overhead configuration for a profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileConfig {
    /// The time grid covers `[0, time_limit)`.
    pub time_limit: f64,
    /// Grid resolution; also fixes the store's key format.
    pub time_step_size: f64,
    /// Width of the pooling window per query: samples are gathered from
    /// every grid key in `[quantize(t), quantize(t) + time_interval)`.
    pub time_interval: f64,
    /// Bin width of the discrete quality levels used by exact evaluation.
    pub quality_interval: f64,
    /// Fixed overhead charged to every conditional/loop dispatch decision.
    pub tau: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            time_limit: 10.0,
            time_step_size: 0.1,
            time_interval: 0.1,
            quality_interval: 0.05,
            tau: 0.1,
        }
    }
}

impl ProfileConfig {
    /// The grid times, ascending.
    pub fn time_grid(&self) -> Vec<f64> {
        let count = (self.time_limit / self.time_step_size + 1e-9).floor() as usize;
        (0..count).map(|i| i as f64 * self.time_step_size).collect()
    }
}

/// The probabilistic model mapping (node, allocated time, parent qualities)
/// to achievable quality.
///
/// The persisted store has no parent-quality axis, so conditioning is
/// modeled as input-limited effective time: a node whose inputs average
/// quality q makes use of `q * t` of its allocated time. Leaves condition on
/// nothing and run at full effective time.
#[derive(Debug, Clone)]
pub struct PerformanceProfile {
    store: ProfileStore,
    config: ProfileConfig,
}

impl PerformanceProfile {
    pub fn new(store: ProfileStore, config: ProfileConfig) -> Self {
        Self { store, config }
    }

    pub fn from_file(path: &Path, config: ProfileConfig) -> Result<Self, ProfileError> {
        Ok(Self::new(ProfileStore::load(path)?, config))
    }

    #[inline(always)]
    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    #[inline(always)]
    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    /// Fixed dispatch overhead charged per conditional/loop node.
    #[inline(always)]
    pub fn calculate_tau(&self) -> f64 {
        self.config.tau
    }

    fn effective_time(&self, time: f64, parent_qualities: &[f64]) -> f64 {
        if parent_qualities.is_empty() {
            return time;
        }
        let mean = parent_qualities.iter().sum::<f64>() / parent_qualities.len() as f64;
        time * mean
    }

    /// Sampled qualities achievable at `time` for `node_id` given its
    /// parents' realized qualities. Samples are pooled over the configured
    /// window; queries beyond the grid clamp to its last key.
    pub fn query_quality_list_on_interval(
        &self,
        time: f64,
        node_id: NodeId,
        parent_qualities: &[f64],
    ) -> Result<QualitySamples, ProfileError> {
        let step = self.config.time_step_size;
        let last = quantize((self.config.time_limit - step).max(0.0), step);
        let start = quantize(self.effective_time(time, parent_qualities), step).min(last);

        let mut samples = QualitySamples::new();
        let mut t = start;
        loop {
            samples.extend_from_slice(self.store.samples(node_id, &time_key(t, step))?);
            t += step;
            if t + 1e-9 >= start + self.config.time_interval || t > last + 1e-9 {
                break;
            }
        }
        Ok(samples)
    }

    pub fn average_quality(&self, samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    /// Probability of achieving at least `queried_quality` relative to a
    /// sample list: the fraction of samples meeting it.
    pub fn query_probability_contract_expression(
        &self,
        queried_quality: f64,
        samples: &[f64],
    ) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let hits = samples.iter().filter(|&&s| s >= queried_quality).count();
        hits as f64 / samples.len() as f64
    }

    /// Probability mass of the discrete level `[level, level + interval)`
    /// relative to a sample list. The exact evaluator sums these across its
    /// enumerated level combinations.
    pub fn query_probability_of_quality_level(&self, level: f64, samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let upper = level + self.config.quality_interval;
        let hits = samples.iter().filter(|&&s| level <= s && s < upper).count();
        hits as f64 / samples.len() as f64
    }

    /// Realized qualities of `node`'s parents under `allocations`, in
    /// parent-list order; empty for leaves.
    ///
    /// Dispatch parents are control, not data: they contribute no quality of
    /// their own and are resolved transparently through to their inputs.
    /// Parents summarized by a subprogram contribute nothing here (their
    /// effect arrives through the dispatch node's own outcome); a schedulable
    /// parent left unallocated contributes the 0.0 floor.
    pub fn find_parent_qualities(
        &self,
        dag: &ProgramDag,
        node: &ProgramNode,
        allocations: &Allocations,
        depth: usize,
    ) -> Result<ParentQualities, ProfileError> {
        debug_assert!(depth <= dag.order(), "parent recursion deeper than the DAG");
        let mut qualities = ParentQualities::new();
        for &parent_id in &node.parents {
            self.push_parent_quality(dag, parent_id, allocations, depth, &mut qualities)?;
        }
        Ok(qualities)
    }

    fn push_parent_quality(
        &self,
        dag: &ProgramDag,
        parent_id: NodeId,
        allocations: &Allocations,
        depth: usize,
        out: &mut ParentQualities,
    ) -> Result<(), ProfileError> {
        let Some(parent) = dag.node(parent_id) else {
            // Parent edges are validated at DAG construction.
            out.push(0.0);
            return Ok(());
        };
        if parent.in_subtree {
            return Ok(());
        }
        match &parent.kind {
            ExpressionKind::Conditional(_) | ExpressionKind::Loop(_) => {
                for &grandparent in &parent.parents {
                    self.push_parent_quality(dag, grandparent, allocations, depth + 1, out)?;
                }
            }
            ExpressionKind::Contract => match allocations.time(parent_id) {
                Some(time) => {
                    let upstream = self.find_parent_qualities(dag, parent, allocations, depth + 1)?;
                    let samples =
                        self.query_quality_list_on_interval(time, parent_id, &upstream)?;
                    out.push(self.average_quality(&samples));
                }
                None => out.push(0.0),
            },
        }
        Ok(())
    }
}
