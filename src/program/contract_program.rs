//! contract_program.rs
//!
//! The top-level handle for a metareasoning instance: a program DAG paired
//! with a performance profile, a shared time budget, and the evaluation
//! settings the solver reads. Nested programs (conditional branches, loop
//! bodies) are themselves `ContractProgram`s owned by their dispatch node's
//! expression, so the same evaluate/search surface applies at every level.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rand::rngs::StdRng;
use thiserror::Error;

use crate::evaluation::{Evaluator, InnerOverride};
use crate::graph::{ExpressionKind, GraphError, NodeId, ProgramDag};
use crate::profile::{PerformanceProfile, ProfileError};
use crate::program::allocation::{Allocations, TimeAllocation};
use crate::solver::{self, SearchOptions, SearchReport};

/// Errors surfaced while constructing or operating on a contract program.
#[derive(Error, Debug)]
pub enum ProgramError {
    #[error("unknown expected-utility type `{0}`; use `exact` or `approximate`")]
    UnknownUtilityType(String),

    #[error("budget {budget} cannot cover the dispatch overhead of {overhead}")]
    InsufficientBudget { budget: f64, overhead: f64 },

    #[error("time budget must be non-negative, got {budget}")]
    NegativeBudget { budget: f64 },

    #[error("failed to draw a budget partition: {reason}")]
    PartitionDraw { reason: String },

    #[error("restart harness needs at least one restart")]
    NoRestartOutcome,

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("profile error: {0}")]
    Profile(#[from] ProfileError),
}

/// Which engine [`ContractProgram::evaluate`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedUtilityType {
    /// Full enumeration over quality levels, exponential in program order.
    Exact,
    /// Single-pass average-quality scan, linear in program order.
    Approximate,
}

impl ExpectedUtilityType {
    pub fn label(&self) -> &'static str {
        match self {
            ExpectedUtilityType::Exact => "exact",
            ExpectedUtilityType::Approximate => "approximate",
        }
    }
}

impl fmt::Display for ExpectedUtilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ExpectedUtilityType {
    type Err = ProgramError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(ExpectedUtilityType::Exact),
            "approximate" => Ok(ExpectedUtilityType::Approximate),
            _ => Err(ProgramError::UnknownUtilityType(raw.to_string())),
        }
    }
}

/// Role a nested program plays under its dispatch node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubprogramKind {
    TrueBranch,
    FalseBranch,
    LoopBody,
}

impl SubprogramKind {
    /// Branch programs pay the dispatch overhead out of the time handed to
    /// them; loop bodies run inside time already charged to the loop node.
    pub fn pays_dispatch_overhead(&self) -> bool {
        matches!(self, SubprogramKind::TrueBranch | SubprogramKind::FalseBranch)
    }
}

/// Construction settings for [`ContractProgram::new`].
#[derive(Debug, Clone)]
pub struct ProgramConfig {
    /// Wall-clock budget shared by every node in the program.
    pub budget: f64,
    /// Multiplier applied when rendering utilities for display.
    pub scale: f64,
    /// Rounding applied when rendering utilities and allocations.
    pub decimals: usize,
    /// Engine selection for `evaluate`.
    pub expected_utility_type: ExpectedUtilityType,
    /// Quality levels the exact engine enumerates. Empty derives a uniform
    /// grid from the profile's quality interval.
    pub possible_qualities: Vec<f64>,
    /// Set on nested programs only; `None` marks the outer program.
    pub subprogram_kind: Option<SubprogramKind>,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        ProgramConfig {
            budget: 10.0,
            scale: 1.0,
            decimals: 3,
            expected_utility_type: ExpectedUtilityType::Approximate,
            possible_qualities: Vec::new(),
            subprogram_kind: None,
        }
    }
}

/// Uniform quality levels spanning [0, 1] at `interval` spacing. A
/// non-positive interval degenerates to the two endpoints.
fn quality_grid(interval: f64) -> Vec<f64> {
    if interval <= 0.0 {
        return vec![0.0, 1.0];
    }
    let steps = (1.0 / interval + 1e-9).floor() as usize;
    (0..=steps).map(|i| i as f64 * interval).collect()
}

/// A contract program: the unit the solver optimizes and the evaluator
/// scores.
#[derive(Debug, Clone)]
pub struct ContractProgram {
    pub(crate) program_id: u32,
    pub(crate) dag: ProgramDag,
    pub(crate) budget: f64,
    pub(crate) allocations: Allocations,
    pub(crate) scale: f64,
    pub(crate) decimals: usize,
    pub(crate) expected_utility_type: ExpectedUtilityType,
    pub(crate) possible_qualities: Vec<f64>,
    pub(crate) profile: Arc<PerformanceProfile>,
    pub(crate) subprogram_kind: Option<SubprogramKind>,
}

impl ContractProgram {
    pub fn new(
        program_id: u32,
        dag: ProgramDag,
        profile: Arc<PerformanceProfile>,
        config: ProgramConfig,
    ) -> Result<Self, ProgramError> {
        if config.budget < 0.0 {
            return Err(ProgramError::NegativeBudget { budget: config.budget });
        }
        let overhead = profile.calculate_tau() * dag.dispatch_count() as f64;
        if config.budget < overhead {
            return Err(ProgramError::InsufficientBudget { budget: config.budget, overhead });
        }
        let possible_qualities = if config.possible_qualities.is_empty() {
            quality_grid(profile.config().quality_interval)
        } else {
            config.possible_qualities
        };
        let allocations = Allocations::unallocated(&dag);
        Ok(ContractProgram {
            program_id,
            dag,
            budget: config.budget,
            allocations,
            scale: config.scale,
            decimals: config.decimals,
            expected_utility_type: config.expected_utility_type,
            possible_qualities,
            profile,
            subprogram_kind: config.subprogram_kind,
        })
    }

    // --- Accessors ---

    pub fn id(&self) -> u32 {
        self.program_id
    }

    pub fn dag(&self) -> &ProgramDag {
        &self.dag
    }

    pub fn budget(&self) -> f64 {
        self.budget
    }

    pub fn allocations(&self) -> &Allocations {
        &self.allocations
    }

    pub fn profile(&self) -> &PerformanceProfile {
        &self.profile
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn decimals(&self) -> usize {
        self.decimals
    }

    pub fn expected_utility_type(&self) -> ExpectedUtilityType {
        self.expected_utility_type
    }

    pub fn possible_qualities(&self) -> &[f64] {
        &self.possible_qualities
    }

    pub fn subprogram_kind(&self) -> Option<SubprogramKind> {
        self.subprogram_kind
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.dag.has_node(id)
    }

    /// Fixed overhead charged per dispatch decision.
    pub fn tau(&self) -> f64 {
        self.profile.calculate_tau()
    }

    /// Replace the committed allocation vector. The vector must cover
    /// exactly this program's members; shape mismatches are caught by the
    /// validation pass.
    pub fn set_allocations(&mut self, allocations: Allocations) {
        debug_assert_eq!(allocations.len(), self.dag.order());
        self.allocations = allocations;
    }

    /// Nested programs owned by this program's dispatch nodes, in id order.
    pub fn child_programs(&self) -> Vec<&ContractProgram> {
        let mut subs = Vec::new();
        for node in self.dag.nodes() {
            if node.in_subtree {
                continue;
            }
            match &node.kind {
                ExpressionKind::Conditional(expr) => {
                    subs.push(expr.on_true.as_ref());
                    subs.push(expr.on_false.as_ref());
                }
                ExpressionKind::Loop(expr) => subs.push(expr.body.as_ref()),
                ExpressionKind::Contract => {}
            }
        }
        subs
    }

    /// Number of independently movable time slots: contract nodes the
    /// program itself schedules, with each conditional branch pair counted
    /// once since siblings move in lock-step.
    pub fn independent_slot_count(&self) -> usize {
        let plain = self
            .dag
            .nodes()
            .iter()
            .filter(|n| !n.in_subtree && !n.is_dispatch())
            .count();
        plain - self.dag.branch_pairs().len()
    }

    /// Even share each independent slot receives once dispatch overhead is
    /// charged against `budget`.
    pub(crate) fn uniform_share(&self, budget: f64) -> f64 {
        let slots = self.independent_slot_count();
        if slots == 0 {
            return 0.0;
        }
        let overhead = self.tau() * self.dag.dispatch_count() as f64;
        (budget - overhead).max(0.0) / slots as f64
    }

    /// Rebuild this program around a new total budget. Allocations are
    /// cleared rather than rescaled, so the caller runs an initializer or a
    /// search next; this keeps the budget and the committed vector from ever
    /// disagreeing.
    pub fn with_budget(mut self, budget: f64) -> Result<Self, ProgramError> {
        if budget < 0.0 {
            return Err(ProgramError::NegativeBudget { budget });
        }
        let overhead = self.tau() * self.dag.dispatch_count() as f64;
        if budget < overhead {
            return Err(ProgramError::InsufficientBudget { budget, overhead });
        }
        self.budget = budget;
        self.allocations = Allocations::unallocated(&self.dag);
        Ok(self)
    }

    // --- Evaluation ---

    /// Expected utility of the committed allocation vector.
    pub fn evaluate(&self) -> Result<f64, ProgramError> {
        Evaluator::new(self).evaluate(&self.allocations, None)
    }

    /// Expected utility of `allocations`, optionally substituting nested
    /// allocation vectors for dispatch nodes without touching committed
    /// state anywhere in the tree.
    pub fn evaluate_with(
        &self,
        allocations: &Allocations,
        inner: Option<&InnerOverride>,
    ) -> Result<f64, ProgramError> {
        Evaluator::new(self).evaluate(allocations, inner)
    }

    /// Flat-form view of a nested program: when every schedulable member
    /// carries an explicit time in `outer`, the projection of `outer` onto
    /// the member set is the vector to evaluate. `None` means the nested
    /// program keeps its own committed vector.
    pub(crate) fn inline_allocations(&self, outer: &Allocations) -> Option<Allocations> {
        let covered = self
            .dag
            .nodes()
            .iter()
            .all(|n| n.in_subtree || outer.time(n.id).is_some());
        if covered {
            Some(outer.project(&self.dag))
        } else {
            None
        }
    }

    // --- Initializers ---

    /// Spread the budget evenly over independent slots and commit.
    pub fn initialize_uniform(&mut self) -> Result<(), ProgramError> {
        let allocations = solver::initializer::uniform(self)?;
        self.commit_initial(allocations);
        Ok(())
    }

    /// Draw one allocation vector from a flat Dirichlet over the independent
    /// slots and commit.
    pub fn initialize_dirichlet(&mut self, rng: &mut StdRng) -> Result<(), ProgramError> {
        let allocations = solver::initializer::dirichlet(self, rng)?;
        self.commit_initial(allocations);
        Ok(())
    }

    /// Start uniform, then apply `perturbations` random pairwise transfers of
    /// magnitude below `bound` and commit.
    pub fn initialize_uniform_with_noise(
        &mut self,
        rng: &mut StdRng,
        bound: f64,
        perturbations: usize,
    ) -> Result<(), ProgramError> {
        let allocations = solver::initializer::uniform_with_noise(self, rng, bound, perturbations)?;
        self.commit_initial(allocations);
        Ok(())
    }

    fn commit_initial(&mut self, allocations: Allocations) {
        self.allocations = allocations;
        // Nested programs start from an explicit zero state rather than an
        // unallocated one; the first inner search with a positive taxed
        // budget replaces it.
        let dispatch: Vec<NodeId> = self
            .dag
            .nodes()
            .iter()
            .filter(|n| n.is_dispatch() && !n.in_subtree)
            .map(|n| n.id)
            .collect();
        for id in dispatch {
            if let Some(node) = self.dag.node_mut(id) {
                match &mut node.kind {
                    ExpressionKind::Conditional(expr) => {
                        expr.on_true.zero_allocations();
                        expr.on_false.zero_allocations();
                    }
                    ExpressionKind::Loop(expr) => expr.body.zero_allocations(),
                    ExpressionKind::Contract => {}
                }
            }
        }
    }

    /// Zero every schedulable slot here and in every nested program below.
    /// Dispatch slots keep their tau pre-charge, and null-time members stay
    /// null; they are summarized by their subprogram.
    pub(crate) fn zero_allocations(&mut self) {
        let tau = self.tau();
        let entries: Vec<TimeAllocation> = self
            .dag
            .nodes()
            .iter()
            .map(|n| {
                if n.in_subtree {
                    TimeAllocation::new(n.id, None)
                } else if n.is_dispatch() {
                    TimeAllocation::new(n.id, Some(tau))
                } else {
                    TimeAllocation::new(n.id, Some(0.0))
                }
            })
            .collect();
        self.allocations = Allocations::from_entries(entries);
        let dispatch: Vec<NodeId> = self
            .dag
            .nodes()
            .iter()
            .filter(|n| n.is_dispatch() && !n.in_subtree)
            .map(|n| n.id)
            .collect();
        for id in dispatch {
            if let Some(node) = self.dag.node_mut(id) {
                match &mut node.kind {
                    ExpressionKind::Conditional(expr) => {
                        expr.on_true.zero_allocations();
                        expr.on_false.zero_allocations();
                    }
                    ExpressionKind::Loop(expr) => expr.body.zero_allocations(),
                    ExpressionKind::Contract => {}
                }
            }
        }
    }

    // --- Search ---

    /// Plain pairwise search over this program's own slots. Nested programs
    /// keep whatever vectors they hold.
    pub fn hill_climb(&mut self, options: &SearchOptions) -> Result<SearchReport, ProgramError> {
        solver::hill_climbing::hill_climb(self, options)
    }

    /// Outer/inner decomposition: every candidate move re-solves nested
    /// programs under the dispatch time it implies before scoring, and the
    /// accepted candidate's nested vectors are committed with it.
    pub fn hill_climb_outer(
        &mut self,
        options: &SearchOptions,
    ) -> Result<SearchReport, ProgramError> {
        solver::hill_climbing::hill_climb_outer(self, options)
    }

    /// Search this program as a nested one under `dispatch_time`: the budget
    /// becomes the dispatch time minus overhead for branches, or the
    /// dispatch time unchanged for loop bodies.
    pub fn hill_climb_inner(
        &mut self,
        dispatch_time: f64,
        options: &SearchOptions,
    ) -> Result<SearchReport, ProgramError> {
        solver::hill_climbing::hill_climb_inner(self, dispatch_time, options)
    }
}
