//! engine.rs
//! Expected-utility evaluation over a contract program's allocation vector.
//! Two interchangeable engines live here: a linear approximate scan that
//! works with per-node average qualities, and an exact enumeration over
//! discrete quality levels for small validation programs.

use std::collections::BTreeMap;

use crate::graph::{
    ConditionalExpression, ExpressionKind, LoopExpression, NodeId, ProgramDag,
};
use crate::profile::ParentQualities;
use crate::program::{Allocations, ContractProgram, ExpectedUtilityType, ProgramError};

/// Weight given to the true branch when mixing conditional outcomes. Branch
/// predicates are modeled as unbiased coin flips absent observed frequencies.
const TRUE_BRANCH_WEIGHT: f64 = 0.5;

/// Replacement allocation vectors for nested programs, keyed by the owning
/// dispatch node. An outer search uses this to score "what if the branch
/// vectors were X" without touching committed state anywhere in the tree.
#[derive(Debug, Clone, Default)]
pub struct InnerOverride {
    overrides: BTreeMap<NodeId, SubprogramAllocations>,
}

/// One dispatch node's replacement vectors.
#[derive(Debug, Clone)]
pub enum SubprogramAllocations {
    Conditional { on_true: Allocations, on_false: Allocations },
    Loop { body: Allocations },
}

impl InnerOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dispatch: NodeId, allocations: SubprogramAllocations) {
        self.overrides.insert(dispatch, allocations);
    }

    pub fn get(&self, dispatch: NodeId) -> Option<&SubprogramAllocations> {
        self.overrides.get(&dispatch)
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

/// Product utility over the collected qualities. The program succeeds only
/// when every contributing node meets its quality, so contributions compound
/// multiplicatively; an empty set is the neutral 1.0.
fn global_utility(qualities: &[f64]) -> f64 {
    qualities.iter().product()
}

/// Allocation vector a nested program is evaluated under, absent an override:
/// the outer vector's projection when every member is allocated there (flat
/// form), else the nested program's own committed vector.
fn subprogram_vector(sub: &ContractProgram, outer: &Allocations) -> Allocations {
    sub.inline_allocations(outer).unwrap_or_else(|| sub.allocations().clone())
}

fn mark_members(sub: &ContractProgram, visited: &mut [bool]) {
    for node in sub.dag().nodes() {
        if let Some(slot) = visited.get_mut(node.id.index()) {
            *slot = true;
        }
    }
}

/// Scores allocation vectors against one program. Borrows the program
/// immutably for its whole life, so evaluation can never leak state into the
/// tree it reads.
pub struct Evaluator<'a> {
    program: &'a ContractProgram,
}

impl<'a> Evaluator<'a> {
    pub fn new(program: &'a ContractProgram) -> Self {
        Self { program }
    }

    /// Expected utility in [0, 1] of `allocations` under the program's
    /// configured engine.
    pub fn evaluate(
        &self,
        allocations: &Allocations,
        inner: Option<&InnerOverride>,
    ) -> Result<f64, ProgramError> {
        match self.program.expected_utility_type() {
            ExpectedUtilityType::Approximate => {
                let (probability, utility) = self.components(allocations, inner)?;
                Ok(probability * utility)
            }
            ExpectedUtilityType::Exact => self.exact(allocations),
        }
    }

    /// Approximate scan: one pass over the members in dependency order,
    /// producing the running success probability and the product utility of
    /// the collected average qualities.
    ///
    /// A program with nothing allocated contributes nothing and comes out at
    /// the neutral (1.0, 1.0); run an initializer before evaluating.
    pub fn components(
        &self,
        allocations: &Allocations,
        inner: Option<&InnerOverride>,
    ) -> Result<(f64, f64), ProgramError> {
        let dag = self.program.dag();
        let profile = self.program.profile();
        let slots = dag.nodes().iter().map(|n| n.id.index() + 1).max().unwrap_or(0);
        let mut visited = vec![false; slots];
        let mut probability = 1.0;
        let mut qualities: Vec<f64> = Vec::with_capacity(dag.order());

        // Dependency order guarantees a dispatch node precedes its flat
        // branch members, so marking them here counts each contribution
        // exactly once.
        for &id in dag.topological_order() {
            if visited[id.index()] {
                continue;
            }
            visited[id.index()] = true;
            let node = dag.find_node(id)?;
            if node.in_subtree {
                continue;
            }
            match &node.kind {
                ExpressionKind::Contract => {
                    let Some(time) = allocations.time(id) else { continue };
                    let parent_qualities =
                        profile.find_parent_qualities(dag, node, allocations, 0)?;
                    let samples =
                        profile.query_quality_list_on_interval(time, id, &parent_qualities)?;
                    let average = profile.average_quality(&samples);
                    probability *= profile.query_probability_contract_expression(average, &samples);
                    qualities.push(average);
                }
                ExpressionKind::Conditional(expr) => {
                    mark_members(&expr.on_true, &mut visited);
                    mark_members(&expr.on_false, &mut visited);
                    // An unallocated dispatch node contributes nothing; its
                    // members stay covered either way.
                    if allocations.time(id).is_none() {
                        continue;
                    }
                    let (p, q) = self.conditional_outcome(id, expr, allocations, inner)?;
                    probability *= p;
                    qualities.push(q);
                }
                ExpressionKind::Loop(expr) => {
                    mark_members(&expr.body, &mut visited);
                    if allocations.time(id).is_none() {
                        continue;
                    }
                    let (p, q) = self.loop_outcome(id, expr, allocations, inner)?;
                    probability *= p;
                    qualities.push(q);
                }
            }
        }
        Ok((probability, global_utility(&qualities)))
    }

    /// Joint (probability, quality) of taking a conditional: both branches
    /// are scored as programs of their own and mixed by the branch weight.
    fn conditional_outcome(
        &self,
        dispatch: NodeId,
        expr: &ConditionalExpression,
        outer: &Allocations,
        inner: Option<&InnerOverride>,
    ) -> Result<(f64, f64), ProgramError> {
        let override_entry = inner.and_then(|o| o.get(dispatch));
        let (true_vector, false_vector) = if let Some(SubprogramAllocations::Conditional {
            on_true,
            on_false,
        }) = override_entry
        {
            (on_true.clone(), on_false.clone())
        } else {
            (
                subprogram_vector(&expr.on_true, outer),
                subprogram_vector(&expr.on_false, outer),
            )
        };
        let (p_true, u_true) = Evaluator::new(&expr.on_true).components(&true_vector, None)?;
        let (p_false, u_false) = Evaluator::new(&expr.on_false).components(&false_vector, None)?;
        Ok((
            TRUE_BRANCH_WEIGHT * p_true + (1.0 - TRUE_BRANCH_WEIGHT) * p_false,
            TRUE_BRANCH_WEIGHT * u_true + (1.0 - TRUE_BRANCH_WEIGHT) * u_false,
        ))
    }

    /// Joint (probability, quality) of completing a loop: the unrolled body
    /// scored as a program of its own.
    fn loop_outcome(
        &self,
        dispatch: NodeId,
        expr: &LoopExpression,
        outer: &Allocations,
        inner: Option<&InnerOverride>,
    ) -> Result<(f64, f64), ProgramError> {
        let vector = if let Some(SubprogramAllocations::Loop { body }) =
            inner.and_then(|o| o.get(dispatch))
        {
            body.clone()
        } else {
            subprogram_vector(&expr.body, outer)
        };
        Evaluator::new(&expr.body).components(&vector, None)
    }

    /// Exact expectation: sum P(q) * U(q) over every combination of discrete
    /// quality levels, visiting nodes in dependency order so each node's
    /// level probability conditions on the levels its parents actually
    /// realized. Reconverging paths below a shared ancestor therefore see one
    /// realization of that ancestor, and total probability mass stays at 1.
    /// Dispatch, summarized and unallocated nodes are transparent; they have
    /// no profile of their own.
    fn exact(&self, allocations: &Allocations) -> Result<f64, ProgramError> {
        let dag = self.program.dag();
        let slots = dag.nodes().iter().map(|n| n.id.index() + 1).max().unwrap_or(0);
        let mut realized: Vec<Option<f64>> = vec![None; slots];
        self.enumerate_levels(0, &mut realized, 1.0, allocations)
    }

    fn enumerate_levels(
        &self,
        position: usize,
        realized: &mut Vec<Option<f64>>,
        mass: f64,
        allocations: &Allocations,
    ) -> Result<f64, ProgramError> {
        let dag = self.program.dag();
        let topo = dag.topological_order();
        if position == topo.len() {
            let utility: f64 = realized.iter().flatten().product();
            return Ok(mass * utility);
        }
        let id = topo[position];
        let node = dag.find_node(id)?;
        let time = match allocations.time(id) {
            Some(t) if !node.in_subtree && !node.is_dispatch() => t,
            _ => return self.enumerate_levels(position + 1, realized, mass, allocations),
        };

        let profile = self.program.profile();
        let mut context = ParentQualities::new();
        for &parent in &node.parents {
            push_realized_level(dag, parent, realized, &mut context);
        }
        let samples = profile.query_quality_list_on_interval(time, id, &context)?;

        let mut total = 0.0;
        for &level in self.program.possible_qualities() {
            let level_mass = profile.query_probability_of_quality_level(level, &samples);
            if level_mass <= 0.0 {
                continue;
            }
            realized[id.index()] = Some(level);
            total += self.enumerate_levels(position + 1, realized, mass * level_mass, allocations)?;
        }
        realized[id.index()] = None;
        Ok(total)
    }
}

/// Parent context for exact conditioning, mirroring the approximate engine's
/// resolution rules over realized levels instead of recomputed averages.
fn push_realized_level(
    dag: &ProgramDag,
    parent_id: NodeId,
    realized: &[Option<f64>],
    out: &mut ParentQualities,
) {
    let Some(parent) = dag.node(parent_id) else {
        out.push(0.0);
        return;
    };
    if parent.in_subtree {
        return;
    }
    if parent.is_dispatch() {
        for &grandparent in &parent.parents {
            push_realized_level(dag, grandparent, realized, out);
        }
        return;
    }
    match realized.get(parent_id.index()).copied().flatten() {
        Some(level) => out.push(level),
        // Dependency order realizes allocated parents first, so a hole here
        // is an unallocated member: the floor applies.
        None => out.push(0.0),
    }
}
