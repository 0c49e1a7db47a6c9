//! dag.rs
//! The program DAG: a sorted member-node list over the global id space,
//! validated and topologically ordered at construction.

use super::node::{ExpressionKind, NodeId, ProgramNode};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Graph has no nodes")]
    Empty,
    #[error("Duplicate node id {node_id} in graph")]
    DuplicateNodeId { node_id: NodeId },
    #[error("Node {node_id} lists unknown parent {parent}")]
    UnknownParent { node_id: NodeId, parent: NodeId },
    #[error("Root node {root} is not a member of the graph")]
    RootMissing { root: NodeId },
    #[error("Cycle detected in graph")]
    CycleDetected,
    #[error("Node {node_id} not found in graph")]
    NodeNotFound { node_id: NodeId },
}

/// An immutable dependency DAG over contract-program nodes.
///
/// Edges run parent -> child toward the single root. A subprogram's DAG holds
/// a subset of the global id space, so member storage is a sorted list with a
/// slot table rather than a dense array.
#[derive(Debug, Clone)]
pub struct ProgramDag {
    /// Member nodes in ascending id order.
    nodes: Vec<ProgramNode>,
    /// Global id -> position in `nodes`.
    slots: Vec<Option<u32>>,
    root: NodeId,
    /// Dependency order: every parent precedes its children.
    topo: Vec<NodeId>,
}

impl ProgramDag {
    pub fn new(mut nodes: Vec<ProgramNode>, root: NodeId) -> Result<Self, GraphError> {
        if nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        // 1. Sort members by id and build the slot table, rejecting duplicates.
        nodes.sort_by_key(|n| n.id);
        let max_id = nodes[nodes.len() - 1].id.index();
        let mut slots: Vec<Option<u32>> = vec![None; max_id + 1];
        for (pos, node) in nodes.iter().enumerate() {
            let slot = &mut slots[node.id.index()];
            if slot.is_some() {
                return Err(GraphError::DuplicateNodeId { node_id: node.id });
            }
            *slot = Some(pos as u32);
        }
        if slots.get(root.index()).copied().flatten().is_none() {
            return Err(GraphError::RootMissing { root });
        }

        // 2. Derive children from the member parent lists. Members are
        //    visited in id order, so child lists come out id-ordered too.
        let mut edges: Vec<(u32, NodeId)> = Vec::new();
        for node in &nodes {
            for &parent in &node.parents {
                let parent_pos = slots
                    .get(parent.index())
                    .copied()
                    .flatten()
                    .ok_or(GraphError::UnknownParent { node_id: node.id, parent })?;
                edges.push((parent_pos, node.id));
            }
        }
        for node in nodes.iter_mut() {
            node.children.clear();
        }
        for &(parent_pos, child) in &edges {
            nodes[parent_pos as usize].children.push(child);
        }

        // 3. Mirror into petgraph for cycle detection and dependency order.
        let mut graph = DiGraph::<NodeId, ()>::with_capacity(nodes.len(), edges.len());
        let indices: Vec<_> = nodes.iter().map(|n| graph.add_node(n.id)).collect();
        for (pos, node) in nodes.iter().enumerate() {
            for &parent in &node.parents {
                // Membership was checked above.
                if let Some(parent_pos) = slots[parent.index()] {
                    graph.add_edge(indices[parent_pos as usize], indices[pos], ());
                }
            }
        }
        let sorted = toposort(&graph, None).map_err(|_| GraphError::CycleDetected)?;
        let topo = sorted.into_iter().map(|i| graph[i]).collect();

        Ok(Self { nodes, slots, root, topo })
    }

    #[inline(always)]
    pub fn order(&self) -> usize {
        self.nodes.len()
    }

    #[inline(always)]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Members in ascending id order.
    pub fn nodes(&self) -> &[ProgramNode] {
        &self.nodes
    }

    pub fn has_node(&self, id: NodeId) -> bool {
        self.slots.get(id.index()).copied().flatten().is_some()
    }

    pub fn node(&self, id: NodeId) -> Option<&ProgramNode> {
        let pos = self.slots.get(id.index()).copied().flatten()?;
        Some(&self.nodes[pos as usize])
    }

    /// Lookup that treats a missing node as fatal, mirroring the contract
    /// that allocation vectors and DAG membership never drift apart.
    pub fn find_node(&self, id: NodeId) -> Result<&ProgramNode, GraphError> {
        self.node(id).ok_or(GraphError::NodeNotFound { node_id: id })
    }

    /// Dependency order computed at construction: parents before children.
    pub fn topological_order(&self) -> &[NodeId] {
        &self.topo
    }

    /// Mutable access for committing subprogram state inside a node's
    /// expression. Structural fields (parents/children) must not be modified
    /// through this; the derived children and topological order would go
    /// stale.
    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut ProgramNode> {
        let pos = self.slots.get(id.index()).copied().flatten()?;
        Some(&mut self.nodes[pos as usize])
    }

    /// Dispatch nodes charged tau at this program's level. Nested dispatch
    /// nodes inside subprograms are charged by their own initializer.
    pub fn dispatch_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.is_dispatch() && !n.in_subtree)
            .count()
    }

    // --- Structure Queries ---

    /// The dispatch node whose subprogram owns `id`, if any. Consumers of a
    /// dispatch node's output are its children too, but they are not owned
    /// members and resolve to `None` here.
    pub fn governing_dispatch(&self, id: NodeId) -> Option<&ProgramNode> {
        let node = self.node(id)?;
        node.parents
            .iter()
            .filter_map(|&p| self.node(p))
            .find(|parent| parent.kind.owns_member(id))
    }

    /// The head of the opposite branch for a conditional branch head.
    /// Branch symmetry couples exactly these two slots.
    pub fn branch_sibling(&self, id: NodeId) -> Option<NodeId> {
        let dispatch = self.governing_dispatch(id)?;
        let ExpressionKind::Conditional(expr) = &dispatch.kind else {
            return None;
        };
        let other = if expr.on_true.contains_node(id) {
            &expr.on_false
        } else {
            &expr.on_true
        };
        dispatch
            .children
            .iter()
            .copied()
            .find(|&c| c != id && other.contains_node(c))
    }

    /// (true, false) branch-head pairs of flat conditionals, i.e. pairs that
    /// are independently allocated in this DAG's own vector.
    pub fn branch_pairs(&self) -> Vec<(NodeId, NodeId)> {
        let mut pairs = Vec::new();
        for node in &self.nodes {
            if node.in_subtree {
                continue;
            }
            let ExpressionKind::Conditional(expr) = &node.kind else {
                continue;
            };
            let head_true = node
                .children
                .iter()
                .copied()
                .find(|&c| expr.on_true.contains_node(c));
            let head_false = node
                .children
                .iter()
                .copied()
                .find(|&c| expr.on_false.contains_node(c));
            if let (Some(t), Some(f)) = (head_true, head_false) {
                let inlined = |id: NodeId| self.node(id).is_some_and(|n| !n.in_subtree);
                if inlined(t) && inlined(f) {
                    pairs.push((t, f));
                }
            }
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::ConditionalExpression;
    use crate::profile::{PerformanceProfile, ProfileConfig, ProfileStore};
    use crate::program::{ContractProgram, ProgramConfig};
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

    fn leaf_program(id: u32) -> Box<ContractProgram> {
        let dag = ProgramDag::new(vec![contract(id, &[])], NodeId(id)).unwrap();
        Box::new(ContractProgram::new(id, dag, test_profile(), ProgramConfig::default()).unwrap())
    }

    /// Diamond: 3 feeds 1 and 2, both feed the root 0.
    fn diamond() -> ProgramDag {
        let nodes = vec![
            contract(0, &[1, 2]),
            contract(1, &[3]),
            contract(2, &[3]),
            contract(3, &[]),
        ];
        ProgramDag::new(nodes, NodeId(0)).unwrap()
    }

    #[test]
    fn test_children_derived_in_id_order() {
        let dag = diamond();
        assert_eq!(dag.node(NodeId(3)).unwrap().children, vec![NodeId(1), NodeId(2)]);
        assert_eq!(dag.node(NodeId(0)).unwrap().children, Vec::<NodeId>::new());
    }

    #[test]
    fn test_topological_order_diamond() {
        let dag = diamond();
        let order = dag.topological_order();
        let pos = |id: u32| order.iter().position(|&n| n == NodeId(id)).unwrap();
        // The shared dependency must come first, the root last.
        assert!(pos(3) < pos(1));
        assert!(pos(3) < pos(2));
        assert!(pos(1) < pos(0));
        assert!(pos(2) < pos(0));
    }

    #[test]
    fn test_cycle_detection_explicit() {
        let nodes = vec![contract(0, &[1]), contract(1, &[0])];
        let err = ProgramDag::new(nodes, NodeId(0)).unwrap_err();
        assert_eq!(err, GraphError::CycleDetected);
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let nodes = vec![contract(0, &[7])];
        let err = ProgramDag::new(nodes, NodeId(0)).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownParent { node_id: NodeId(0), parent: NodeId(7) }
        );
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let nodes = vec![contract(0, &[]), contract(0, &[])];
        let err = ProgramDag::new(nodes, NodeId(0)).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNodeId { node_id: NodeId(0) });
    }

    #[test]
    fn test_find_node_missing_is_fatal() {
        let dag = diamond();
        let err = dag.find_node(NodeId(9)).unwrap_err();
        assert_eq!(err, GraphError::NodeNotFound { node_id: NodeId(9) });
    }

    /// Flat conditional fixture: 4 -> conditional 3 -> branches 1, 2 -> root 0.
    fn flat_conditional() -> ProgramDag {
        let expr = ConditionalExpression { on_true: leaf_program(1), on_false: leaf_program(2) };
        let nodes = vec![
            contract(0, &[1, 2]),
            contract(1, &[3]),
            contract(2, &[3]),
            ProgramNode::conditional(NodeId(3), vec![NodeId(4)], expr),
            contract(4, &[]),
        ];
        ProgramDag::new(nodes, NodeId(0)).unwrap()
    }

    #[test]
    fn test_branch_sibling_resolves_both_ways() {
        let dag = flat_conditional();
        assert_eq!(dag.branch_sibling(NodeId(1)), Some(NodeId(2)));
        assert_eq!(dag.branch_sibling(NodeId(2)), Some(NodeId(1)));
        assert_eq!(dag.branch_sibling(NodeId(0)), None);
        assert_eq!(dag.branch_sibling(NodeId(4)), None);
    }

    #[test]
    fn test_governing_dispatch_ignores_consumers() {
        let dag = flat_conditional();
        assert_eq!(dag.governing_dispatch(NodeId(1)).unwrap().id, NodeId(3));
        assert_eq!(dag.governing_dispatch(NodeId(2)).unwrap().id, NodeId(3));
        // The root consumes branch output but is owned by no subprogram.
        assert!(dag.governing_dispatch(NodeId(0)).is_none());
        assert!(dag.governing_dispatch(NodeId(4)).is_none());
    }

    #[test]
    fn test_branch_pairs_and_dispatch_count() {
        let dag = flat_conditional();
        assert_eq!(dag.branch_pairs(), vec![(NodeId(1), NodeId(2))]);
        assert_eq!(dag.dispatch_count(), 1);
        assert_eq!(diamond().dispatch_count(), 0);
    }
}
