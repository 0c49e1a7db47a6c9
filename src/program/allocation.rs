//! allocation.rs
//! Time-allocation vectors: the value state the search explores and commits.

use crate::graph::{NodeId, ProgramDag};

/// One node's share of the budget. A `None` time marks a slot that is
/// structurally present (keeping the vector aligned with its DAG) but not
/// independently allocated, e.g. a subtree member whose time is owned by its
/// subprogram's own vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeAllocation {
    pub node_id: NodeId,
    pub time: Option<f64>,
}

impl TimeAllocation {
    pub fn new(node_id: NodeId, time: Option<f64>) -> Self {
        Self { node_id, time }
    }
}

/// An allocation vector: one entry per member node, in ascending id order.
///
/// Vectors are owned values. The optimizer clones the committed vector into
/// each candidate and commits accepted candidates by move, so a rejected
/// candidate can never alias the baseline it was compared against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocations {
    entries: Vec<TimeAllocation>,
}

impl Allocations {
    pub fn from_entries(mut entries: Vec<TimeAllocation>) -> Self {
        entries.sort_by_key(|e| e.node_id);
        Self { entries }
    }

    /// A vector covering every member of `dag` with no time assigned yet.
    pub fn unallocated(dag: &ProgramDag) -> Self {
        Self {
            entries: dag
                .nodes()
                .iter()
                .map(|n| TimeAllocation::new(n.id, None))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TimeAllocation] {
        &self.entries
    }

    fn position(&self, id: NodeId) -> Option<usize> {
        self.entries.binary_search_by_key(&id, |e| e.node_id).ok()
    }

    pub fn get(&self, id: NodeId) -> Option<&TimeAllocation> {
        self.position(id).map(|pos| &self.entries[pos])
    }

    /// The allocated time for `id`, flattened: `None` when the slot is
    /// absent or unallocated.
    #[inline(always)]
    pub fn time(&self, id: NodeId) -> Option<f64> {
        self.position(id).and_then(|pos| self.entries[pos].time)
    }

    /// Returns false when the vector has no slot for `id`.
    pub fn set_time(&mut self, id: NodeId, time: Option<f64>) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.entries[pos].time = time;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeAllocation> {
        self.entries.iter()
    }

    /// The allocated slots as (id, time) pairs.
    pub fn non_null(&self) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.entries.iter().filter_map(|e| e.time.map(|t| (e.node_id, t)))
    }

    /// Projects the slots for `dag`'s members out of this vector, preserving
    /// null marks. Used to hand a flat subprogram its inline allocations.
    pub fn project(&self, dag: &ProgramDag) -> Allocations {
        Allocations {
            entries: dag
                .nodes()
                .iter()
                .map(|n| TimeAllocation::new(n.id, self.time(n.id)))
                .collect(),
        }
    }

    /// Total allocated time, counting each conditional branch pair once
    /// (both siblings hold the same shared value) and including the tau
    /// pre-charge sitting on dispatch slots. For any initializer output this
    /// equals the input budget.
    pub fn allocated_total(&self, dag: &ProgramDag) -> f64 {
        let mut total = 0.0;
        for (id, time) in self.non_null() {
            if let Some(sibling) = dag.branch_sibling(id) {
                // Count the shared pair value at the lower-id sibling only.
                if sibling < id {
                    continue;
                }
            }
            total += time;
        }
        total
    }
}
