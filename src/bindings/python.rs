//! FFI facade for Python: profile-store generation plus the full
//! build-evaluate-search loop over contract programs.
//!
//! Conditionals and loops are built in flat form here: each subprogram is a
//! single head node inlined in the outer DAG. Deep nesting stays a Rust-side
//! construction.

use crate::analysis::RestartHarness;
use crate::display::trace;
use crate::graph::{ConditionalExpression, LoopExpression, NodeId, ProgramDag, ProgramNode};
use crate::profile::{Generator, PerformanceProfile, ProfileConfig, ProfileStore};
use crate::program::{ContractProgram, ExpectedUtilityType, ProgramConfig, SubprogramKind};
use crate::solver::SearchOptions;
use crate::validation::Validator;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::Arc;

/// Generates a synthetic profile store for a contract-only DAG and writes it
/// to `path` in the persisted JSON layout. Returns the record count.
#[pyfunction]
pub fn generate_profile_store(
    path: &str,
    root: u32,
    contracts: Vec<(u32, Vec<u32>)>,
    instances: usize,
    seed: u64,
) -> PyResult<usize> {
    let nodes: Vec<ProgramNode> = contracts
        .into_iter()
        .map(|(id, parents)| {
            ProgramNode::contract(NodeId(id), parents.into_iter().map(NodeId).collect())
        })
        .collect();
    let dag = ProgramDag::new(nodes, NodeId(root))
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let config = ProfileConfig::default();
    let mut rng = StdRng::seed_from_u64(seed);
    let store = Generator::new(instances)
        .generate(&dag, &config, &mut rng)
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    store
        .save(Path::new(path))
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    Ok(store.len())
}

fn leaf_subprogram(
    head: u32,
    kind: SubprogramKind,
    config: &ProgramConfig,
    profile: &Arc<PerformanceProfile>,
) -> PyResult<Box<ContractProgram>> {
    let dag = ProgramDag::new(
        vec![ProgramNode::contract(NodeId(head), Vec::new())],
        NodeId(head),
    )
    .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let config = ProgramConfig { subprogram_kind: Some(kind), ..config.clone() };
    ContractProgram::new(head, dag, Arc::clone(profile), config)
        .map(Box::new)
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

#[pyclass(name = "_ContractProgram")]
#[derive(Debug, Clone)]
pub struct PyContractProgram {
    pub inner: ContractProgram,
}

#[pymethods]
impl PyContractProgram {
    /// Builds a program over a profile store on disk.
    ///
    /// `contracts` lists plain nodes as `(id, parents)`; `conditionals` as
    /// `(id, parents, true_head, false_head)` and `loops` as `(id, parents,
    /// body_head, iterations)`, with each head listed in `contracts` too and
    /// wired as a child of its dispatch node.
    #[new]
    #[pyo3(signature = (
        root,
        contracts,
        conditionals,
        loops,
        budget,
        profile_path,
        utility_type = "approximate",
        scale = 1.0,
        decimals = 3
    ))]
    pub fn new(
        root: u32,
        contracts: Vec<(u32, Vec<u32>)>,
        conditionals: Vec<(u32, Vec<u32>, u32, u32)>,
        loops: Vec<(u32, Vec<u32>, u32, u32)>,
        budget: f64,
        profile_path: &str,
        utility_type: &str,
        scale: f64,
        decimals: usize,
    ) -> PyResult<Self> {
        let expected_utility_type = utility_type
            .parse::<ExpectedUtilityType>()
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        let store = ProfileStore::load(Path::new(profile_path))
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        let profile = Arc::new(PerformanceProfile::new(store, ProfileConfig::default()));
        let config = ProgramConfig {
            budget,
            scale,
            decimals,
            expected_utility_type,
            possible_qualities: Vec::new(),
            subprogram_kind: None,
        };

        let mut nodes: Vec<ProgramNode> = contracts
            .into_iter()
            .map(|(id, parents)| {
                ProgramNode::contract(NodeId(id), parents.into_iter().map(NodeId).collect())
            })
            .collect();
        for (id, parents, head_true, head_false) in conditionals {
            let expr = ConditionalExpression {
                on_true: leaf_subprogram(head_true, SubprogramKind::TrueBranch, &config, &profile)?,
                on_false: leaf_subprogram(
                    head_false,
                    SubprogramKind::FalseBranch,
                    &config,
                    &profile,
                )?,
            };
            nodes.push(ProgramNode::conditional(
                NodeId(id),
                parents.into_iter().map(NodeId).collect(),
                expr,
            ));
        }
        for (id, parents, head, iterations) in loops {
            let expr = LoopExpression {
                iterations,
                body: leaf_subprogram(head, SubprogramKind::LoopBody, &config, &profile)?,
            };
            nodes.push(ProgramNode::bounded_loop(
                NodeId(id),
                parents.into_iter().map(NodeId).collect(),
                expr,
            ));
        }

        let dag = ProgramDag::new(nodes, NodeId(root))
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        let inner = ContractProgram::new(0, dag, profile, config)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn evaluate(&self) -> PyResult<f64> {
        self.inner
            .evaluate()
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))
    }

    pub fn initialize_uniform(&mut self) -> PyResult<()> {
        self.inner
            .initialize_uniform()
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))
    }

    pub fn initialize_dirichlet(&mut self, seed: u64) -> PyResult<()> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.inner
            .initialize_dirichlet(&mut rng)
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))
    }

    pub fn initialize_uniform_with_noise(
        &mut self,
        seed: u64,
        bound: f64,
        perturbations: usize,
    ) -> PyResult<()> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.inner
            .initialize_uniform_with_noise(&mut rng, bound, perturbations)
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))
    }

    /// Plain search over the program's own slots. Returns
    /// `(initial_utility, final_utility, rounds, commits)`.
    #[pyo3(signature = (verbose = false))]
    pub fn hill_climb(&mut self, verbose: bool) -> PyResult<(f64, f64, usize, usize)> {
        let options = SearchOptions { verbose, ..SearchOptions::default() };
        let report = self
            .inner
            .hill_climb(&options)
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        Ok((report.initial_utility, report.final_utility, report.rounds, report.commits))
    }

    /// Outer search that re-solves nested programs under every candidate
    /// dispatch time. Same return shape as `hill_climb`.
    #[pyo3(signature = (verbose = false))]
    pub fn hill_climb_outer(&mut self, verbose: bool) -> PyResult<(f64, f64, usize, usize)> {
        let options = SearchOptions { verbose, ..SearchOptions::default() };
        let report = self
            .inner
            .hill_climb_outer(&options)
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        Ok((report.initial_utility, report.final_utility, report.rounds, report.commits))
    }

    /// Runs a seeded batch of random restarts and reports `(seed, utility)`
    /// of the best one without committing it. Re-initializing with the
    /// returned seed and searching again reproduces the winner exactly.
    #[pyo3(signature = (restarts, seed = 0))]
    pub fn best_restart(&self, restarts: usize, seed: u64) -> PyResult<(u64, f64)> {
        let outcome = RestartHarness::new(restarts, seed)
            .run(&self.inner, &SearchOptions::default())
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        Ok((outcome.seed, outcome.utility))
    }

    /// The committed vector as `(node_id, time)` pairs in id order, with
    /// `None` for slots the program does not allocate itself.
    pub fn allocations(&self) -> Vec<(u32, Option<f64>)> {
        self.inner
            .allocations()
            .iter()
            .map(|e| (e.node_id.0, e.time))
            .collect()
    }

    pub fn budget(&self) -> f64 {
        self.inner.budget()
    }

    /// Rebuilds the program around a new budget. The committed vector is
    /// cleared; run an initializer or a search next.
    pub fn set_budget(&mut self, budget: f64) -> PyResult<()> {
        let rebudgeted = self
            .inner
            .clone()
            .with_budget(budget)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        self.inner = rebudgeted;
        Ok(())
    }

    pub fn validate(&self) -> PyResult<()> {
        Validator::new(&self.inner).validate().map_err(|errs| {
            let msg = errs
                .iter()
                .map(|e| e.message.clone())
                .collect::<Vec<_>>()
                .join("\n");
            PyValueError::new_err(msg)
        })
    }

    pub fn format_tree(&self) -> String {
        trace::format_program(&self.inner)
    }

    pub fn node_count(&self) -> usize {
        self.inner.dag().order()
    }
}
