//! Reachability over a program DAG's member edges. Backs the structural
//! validation rules (root reachability) and subtree membership checks.

use crate::graph::{NodeId, ProgramDag};
use std::collections::{HashSet, VecDeque};

/// All nodes reachable from `start_nodes` along child edges, start nodes
/// included. Child edges point toward the root, so this is the set of
/// consumers a node's result can flow into.
pub fn downstream_of(dag: &ProgramDag, start_nodes: &[NodeId]) -> HashSet<NodeId> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(id) = queue.pop_front() {
        if visited.insert(id) {
            if let Some(node) = dag.node(id) {
                queue.extend(node.children.iter().copied());
            }
        }
    }
    visited
}

/// All nodes reachable from `start_nodes` along parent edges, start nodes
/// included: the dependency closure.
pub fn upstream_of(dag: &ProgramDag, start_nodes: &[NodeId]) -> HashSet<NodeId> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(id) = queue.pop_front() {
        if visited.insert(id) {
            if let Some(node) = dag.node(id) {
                queue.extend(node.parents.iter().copied());
            }
        }
    }
    visited
}
