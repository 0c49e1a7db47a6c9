//! hill_climbing.rs
//! Pairwise time-transfer search over an allocation vector. One round scans
//! every ordered (donor, recipient) slot pair at the current step size,
//! collects the strictly improving candidates, and commits the best one; a
//! round with no improvement shrinks the step by the decay factor instead.
//! The search ends when the step falls to the threshold.
//!
//! Three entry points share the skeleton. The plain search moves time between
//! this program's own slots. The outer search additionally lets dispatch
//! slots give and receive time, re-solving the nested programs under each
//! candidate dispatch time before scoring. The inner search is what the outer
//! one runs on those nested programs: it taxes the handed-down dispatch time,
//! re-initializes, and climbs without recursing further.

use crate::evaluation::{InnerOverride, SubprogramAllocations};
use crate::graph::{ExpressionKind, NodeId, ProgramDag, ProgramNode};
use crate::program::{Allocations, ContractProgram, ProgramError};
use crate::solver::initializer;

/// Tuning knobs shared by every search variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    /// Factor the step shrinks by after a round with no improvement.
    pub decay: f64,
    /// Step size at which the search stops.
    pub threshold: f64,
    /// Record one [`SearchIteration`] per scored candidate.
    pub verbose: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions { decay: 1.1, threshold: 1e-4, verbose: false }
    }
}

impl SearchOptions {
    /// Defaults for searches over nested programs. The coarser threshold
    /// keeps the per-candidate re-solves in the outer search cheap.
    pub fn inner() -> Self {
        SearchOptions { threshold: 1e-2, ..SearchOptions::default() }
    }
}

/// One scored candidate, recorded when the search runs verbose.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchIteration {
    pub round: usize,
    pub step: f64,
    pub donor: NodeId,
    pub recipient: NodeId,
    /// Expected utility of the adjusted vector.
    pub candidate_utility: f64,
    /// Expected utility the candidate had to beat.
    pub current_utility: f64,
}

/// Outcome of a search run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchReport {
    pub initial_utility: f64,
    pub final_utility: f64,
    /// Scan rounds performed, counting both committing and decaying rounds.
    pub rounds: usize,
    /// Rounds that committed an improvement.
    pub commits: usize,
    /// Per-candidate records, present only for verbose runs.
    pub trace: Option<Vec<SearchIteration>>,
}

/// Climb over this program's own slots. Dispatch slots stay pinned and
/// nested programs keep whatever vectors they hold.
pub fn hill_climb(
    program: &mut ContractProgram,
    options: &SearchOptions,
) -> Result<SearchReport, ProgramError> {
    climb(program, options, false)
}

/// Climb with dispatch slots in play. A candidate that moves time on or off
/// a dispatch slot re-solves that node's nested programs under the candidate
/// dispatch time and scores against the re-solved vectors; the nested state
/// is committed only when the candidate wins its round, so rejected
/// candidates leave no trace in the tree.
pub fn hill_climb_outer(
    program: &mut ContractProgram,
    options: &SearchOptions,
) -> Result<SearchReport, ProgramError> {
    climb(program, options, true)
}

/// Climb a nested program under `dispatch_time`. Branch programs pay the
/// dispatch overhead out of the handed-down time; loop bodies keep it whole.
/// A taxed budget of zero or less short-circuits: the program's slots are
/// zeroed and the report comes back empty, with no evaluation performed.
pub fn hill_climb_inner(
    program: &mut ContractProgram,
    dispatch_time: f64,
    options: &SearchOptions,
) -> Result<SearchReport, ProgramError> {
    let pays_overhead = program
        .subprogram_kind()
        .is_some_and(|kind| kind.pays_dispatch_overhead());
    let taxed = if pays_overhead { dispatch_time - program.tau() } else { dispatch_time };
    if taxed <= 0.0 {
        program.zero_allocations();
        return Ok(SearchReport::default());
    }
    program.budget = taxed;
    let start = initializer::uniform(program)?;
    program.set_allocations(start);
    climb(program, options, false)
}

/// A candidate the current round may commit: the adjusted vector, its score,
/// and the re-solved nested programs backing any dispatch endpoint.
struct Candidate {
    allocations: Allocations,
    utility: f64,
    searched: Vec<(NodeId, SearchedSubprograms)>,
}

/// Nested programs re-solved for one dispatch endpoint, held until the
/// candidate is committed or dropped.
enum SearchedSubprograms {
    Conditional { on_true: Box<ContractProgram>, on_false: Box<ContractProgram> },
    Loop { body: Box<ContractProgram> },
}

fn climb(
    program: &mut ContractProgram,
    options: &SearchOptions,
    outer: bool,
) -> Result<SearchReport, ProgramError> {
    let initial_utility = program.evaluate_with(program.allocations(), None)?;
    let mut current_utility = initial_utility;

    // The step starts at the uniform per-slot share of the whole budget.
    let slot_count = program.independent_slot_count();
    let mut step = if slot_count == 0 { 0.0 } else { program.budget() / slot_count as f64 };

    let mut rounds = 0usize;
    let mut commits = 0usize;
    let mut trace: Option<Vec<SearchIteration>> = options.verbose.then(Vec::new);

    while step > options.threshold {
        rounds += 1;
        let slots: Vec<NodeId> = program.allocations().non_null().map(|(id, _)| id).collect();
        let mut best: Option<Candidate> = None;

        for &donor in &slots {
            for &recipient in &slots {
                if donor == recipient {
                    continue;
                }
                if !pair_is_legal(program.dag(), donor, recipient, outer) {
                    continue;
                }
                let Some(donor_time) = program.allocations().time(donor) else {
                    continue;
                };
                // A donor that would go negative is skipped, not clamped.
                if donor_time - step < 0.0 {
                    continue;
                }

                let mut candidate = program.allocations().clone();
                shift(program.dag(), &mut candidate, donor, -step);
                shift(program.dag(), &mut candidate, recipient, step);

                let (utility, searched) =
                    score(program, &candidate, [donor, recipient], outer)?;
                if let Some(records) = trace.as_mut() {
                    records.push(SearchIteration {
                        round: rounds,
                        step,
                        donor,
                        recipient,
                        candidate_utility: utility,
                        current_utility,
                    });
                }
                // Strict comparisons keep the first-found candidate on ties.
                if utility > current_utility
                    && best.as_ref().map_or(true, |b| utility > b.utility)
                {
                    best = Some(Candidate { allocations: candidate, utility, searched });
                }
            }
        }

        match best {
            Some(won) => {
                program.set_allocations(won.allocations);
                for (dispatch, searched) in won.searched {
                    commit_searched(program, dispatch, searched);
                }
                current_utility = won.utility;
                commits += 1;
            }
            None => step /= options.decay,
        }
    }

    Ok(SearchReport { initial_utility, final_utility: current_utility, rounds, commits, trace })
}

/// Transfer policy for one ordered pair. Dispatch endpoints are rejected
/// outright in plain and inner searches; the outer search admits them only
/// when their nested programs are deep, since a flat conditional's branches
/// are already searched through their own slots and its dispatch slot must
/// hold nothing but the pinned overhead. Branch heads of one conditional
/// never trade against each other; lock-step would cancel the move.
fn pair_is_legal(dag: &ProgramDag, donor: NodeId, recipient: NodeId, outer: bool) -> bool {
    for id in [donor, recipient] {
        let Some(node) = dag.node(id) else {
            return false;
        };
        if node.is_dispatch() && (!outer || !dispatch_is_deep(dag, node)) {
            return false;
        }
    }
    dag.branch_sibling(donor) != Some(recipient)
}

/// True when every member of every nested program is summarized in the
/// outer DAG rather than allocated there.
fn dispatch_is_deep(dag: &ProgramDag, node: &ProgramNode) -> bool {
    node.kind.subprograms().iter().all(|sub| {
        sub.dag()
            .nodes()
            .iter()
            .all(|member| dag.node(member.id).map_or(true, |outer| outer.in_subtree))
    })
}

/// Apply a signed time shift to a slot, moving its branch sibling in
/// lock-step so branch symmetry survives every transfer.
fn shift(dag: &ProgramDag, allocations: &mut Allocations, id: NodeId, delta: f64) {
    if let Some(time) = allocations.time(id) {
        allocations.set_time(id, Some(time + delta));
    }
    if let Some(sibling) = dag.branch_sibling(id) {
        if let Some(time) = allocations.time(sibling) {
            allocations.set_time(sibling, Some(time + delta));
        }
    }
}

/// Score a candidate vector. In the outer search, every dispatch endpoint
/// first gets its nested programs re-solved under the candidate's dispatch
/// time, on clones; the evaluation then reads those vectors through an
/// override instead of the committed tree.
fn score(
    program: &ContractProgram,
    candidate: &Allocations,
    endpoints: [NodeId; 2],
    outer: bool,
) -> Result<(f64, Vec<(NodeId, SearchedSubprograms)>), ProgramError> {
    if !outer {
        return Ok((program.evaluate_with(candidate, None)?, Vec::new()));
    }

    let mut overrides = InnerOverride::new();
    let mut searched = Vec::new();
    for id in endpoints {
        let node = program.dag().find_node(id)?;
        if !node.is_dispatch() {
            continue;
        }
        let dispatch_time = candidate.time(id).unwrap_or(0.0);
        if let Some((vectors, programs)) = rebudget(node, dispatch_time)? {
            overrides.insert(id, vectors);
            searched.push((id, programs));
        }
    }
    let inner = (!overrides.is_empty()).then_some(&overrides);
    Ok((program.evaluate_with(candidate, inner)?, searched))
}

/// Re-solve a dispatch node's nested programs under a candidate dispatch
/// time, on clones of the committed programs.
fn rebudget(
    node: &ProgramNode,
    dispatch_time: f64,
) -> Result<Option<(SubprogramAllocations, SearchedSubprograms)>, ProgramError> {
    let options = SearchOptions::inner();
    match &node.kind {
        ExpressionKind::Conditional(expr) => {
            let mut on_true = expr.on_true.clone();
            let mut on_false = expr.on_false.clone();
            hill_climb_inner(&mut on_true, dispatch_time, &options)?;
            hill_climb_inner(&mut on_false, dispatch_time, &options)?;
            let vectors = SubprogramAllocations::Conditional {
                on_true: on_true.allocations().clone(),
                on_false: on_false.allocations().clone(),
            };
            Ok(Some((vectors, SearchedSubprograms::Conditional { on_true, on_false })))
        }
        ExpressionKind::Loop(expr) => {
            let mut body = expr.body.clone();
            hill_climb_inner(&mut body, dispatch_time, &options)?;
            let vectors = SubprogramAllocations::Loop { body: body.allocations().clone() };
            Ok(Some((vectors, SearchedSubprograms::Loop { body })))
        }
        ExpressionKind::Contract => Ok(None),
    }
}

/// Move a winning candidate's re-solved nested programs into the tree.
fn commit_searched(program: &mut ContractProgram, dispatch: NodeId, searched: SearchedSubprograms) {
    let Some(node) = program.dag.node_mut(dispatch) else {
        return;
    };
    match (&mut node.kind, searched) {
        (
            ExpressionKind::Conditional(expr),
            SearchedSubprograms::Conditional { on_true, on_false },
        ) => {
            expr.on_true = on_true;
            expr.on_false = on_false;
        }
        (ExpressionKind::Loop(expr), SearchedSubprograms::Loop { body }) => expr.body = body,
        _ => {}
    }
}
