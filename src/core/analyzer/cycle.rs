//! A cycle in the lock-order graph and the "alike" equivalence used to
//! collapse near-duplicates.

use crate::core::analyzer::graph::{CycleType, LockEdge, LockNode};
use crate::core::storage::{ContextFileReader, StoreError};
use crate::core::types::LockId;
use fxhash::{FxHashMap, FxHashSet};

/// A single cycle of edges: one closed walk with no alternative paths.
/// Graph cycles that contain shortcuts show up as several `Cycle` values.
///
/// Value-equal by edge set — the edges are kept sorted so that two cycles
/// discovered through different walks of the same edges compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cycle {
    edges: Vec<LockEdge>,
}

impl Cycle {
    pub(crate) fn new(mut edges: Vec<LockEdge>) -> Self {
        edges.sort_unstable();
        edges.dedup();
        Cycle { edges }
    }

    pub fn edges(&self) -> &[LockEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// The locks the cycle runs through. Collecting the targets is enough:
    /// every source is some other edge's target, the walk being closed.
    pub fn nodes(&self) -> FxHashSet<LockId> {
        self.edges.iter().map(|edge| edge.target).collect()
    }

    /// Whether every edge was contributed by one and the same thread. Such
    /// a cycle cannot deadlock on its own, but flags an ordering that only
    /// needs a second thread to become dangerous.
    pub fn is_single_threaded(&self) -> bool {
        let mut edges = self.edges.iter();
        match edges.next() {
            Some(first) => edges.all(|edge| edge.thread_id == first.thread_id),
            None => true,
        }
    }

    /// Raise the classification of every node this cycle touches.
    pub fn update_node_cycle_status(&self, nodes: &mut FxHashMap<LockId, LockNode>) {
        let cycle_type = if self.is_single_threaded() {
            CycleType::SingleThreadedCycle
        } else {
            CycleType::Cycle
        };
        for edge in &self.edges {
            if let Some(node) = nodes.get_mut(&edge.source) {
                node.raise_cycle_type(cycle_type);
            }
            if let Some(node) = nodes.get_mut(&edge.target) {
                node.raise_cycle_type(cycle_type);
            }
        }
    }

    /// Whether `self` and `other` are the same logical cycle: same size,
    /// same classification, and a one-to-one matching between their edges
    /// under [`edge_alike`]. The matching is greedy first-fit, which is
    /// how duplicates have always been recognized here; a failed greedy
    /// matching means "not alike" even where a cleverer matching might
    /// succeed.
    pub fn alike(
        &self,
        other: &Cycle,
        reader: &mut ContextFileReader,
    ) -> Result<bool, StoreError> {
        if self == other {
            return Ok(true);
        }
        if self.edges.len() != other.edges.len()
            || self.is_single_threaded() != other.is_single_threaded()
        {
            return Ok(false);
        }
        let mut unmatched: Vec<&LockEdge> = other.edges.iter().collect();
        'edges: for edge in &self.edges {
            for candidate in 0..unmatched.len() {
                if edge_alike(edge, unmatched[candidate], reader)? {
                    unmatched.remove(candidate);
                    continue 'edges;
                }
            }
            return Ok(false);
        }
        Ok(true)
    }
}

/// Edge-level alike: the same acquisition pattern between locks of the
/// same classes, regardless of thread identity and context-ID churn.
pub(crate) fn edge_alike(
    a: &LockEdge,
    b: &LockEdge,
    reader: &mut ContextFileReader,
) -> Result<bool, StoreError> {
    if reader.read_lock(a.source)?.class_name() != reader.read_lock(b.source)?.class_name() {
        return Ok(false);
    }
    if reader.read_lock(a.target)?.class_name() != reader.read_lock(b.target)?.class_name() {
        return Ok(false);
    }
    let a_source = reader.read_context(a.source_context)?;
    let b_source = reader.read_context(b.source_context)?;
    if !a_source.alike(&b_source) {
        return Ok(false);
    }
    let a_target = reader.read_context(a.target_context)?;
    let b_target = reader.read_context(b.target_context)?;
    Ok(a_target.alike(&b_target))
}
