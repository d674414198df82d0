//! In-memory lock-order graph built from a replayed event log.
//!
//! Nodes and edges reference each other through lock IDs (the context-store
//! offsets), never through pointers, so the cyclic structure needs no
//! ownership tricks: the node arena is a map from ID to node, and an edge
//! is a small copyable value naming its endpoints.

use crate::core::storage::{LockEventSink, StoreError};
use crate::core::types::{ContextId, LockEvent, LockId, ThreadId};
use fxhash::FxHashMap;
use serde::Serialize;
use std::collections::hash_map::Entry;

/// Cycle involvement of a node. Ordered: a classification is only ever
/// raised, never lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum CycleType {
    NoCycle,
    SingleThreadedCycle,
    Cycle,
}

/// A directed edge of the lock-order graph: the target lock was acquired
/// while the source lock was held.
///
/// Identity is the full quintuple; the owning node merges identical edges
/// by counting duplicates instead of storing them twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockEdge {
    pub source: LockId,
    pub target: LockId,
    pub thread_id: ThreadId,
    pub source_context: ContextId,
    pub target_context: ContextId,
}

/// A graph vertex: one lock, its outgoing edges, and its cycle
/// classification.
pub struct LockNode {
    lock_id: LockId,
    /// Outgoing edges, each with the number of duplicates observed beyond
    /// the first.
    outgoing: FxHashMap<LockEdge, u64>,
    cycle_type: CycleType,
}

impl LockNode {
    fn new(lock_id: LockId) -> Self {
        LockNode {
            lock_id,
            outgoing: FxHashMap::default(),
            cycle_type: CycleType::NoCycle,
        }
    }

    pub fn lock_id(&self) -> LockId {
        self.lock_id
    }

    pub fn cycle_type(&self) -> CycleType {
        self.cycle_type
    }

    pub fn raise_cycle_type(&mut self, candidate: CycleType) {
        if candidate > self.cycle_type {
            self.cycle_type = candidate;
        }
    }

    /// Merge `edge` into the outgoing set, counting a duplicate if an
    /// identical edge is already present.
    pub fn add_outgoing_edge(&mut self, edge: LockEdge) {
        self.outgoing
            .entry(edge)
            .and_modify(|duplicates| *duplicates += 1)
            .or_insert(0);
    }

    pub fn outgoing_edges(&self) -> impl Iterator<Item = &LockEdge> {
        self.outgoing.keys()
    }

    pub fn edges_with_duplicates(&self) -> impl Iterator<Item = (&LockEdge, u64)> {
        self.outgoing.iter().map(|(edge, &duplicates)| (edge, duplicates))
    }

    pub fn unique_edge_count(&self) -> usize {
        self.outgoing.len()
    }

    pub fn duplicated_edge_count(&self) -> u64 {
        self.outgoing.values().sum()
    }

    pub fn duplicates_of(&self, edge: &LockEdge) -> u64 {
        self.outgoing.get(edge).copied().unwrap_or(0)
    }

    /// Rewrite every outgoing edge's context IDs through `translation`,
    /// re-merging edges that become identical afterwards.
    pub(crate) fn translate_context_ids(&mut self, translation: &FxHashMap<ContextId, ContextId>) {
        let old = std::mem::take(&mut self.outgoing);
        for (mut edge, duplicates) in old {
            if let Some(&canonical) = translation.get(&edge.source_context) {
                edge.source_context = canonical;
            }
            if let Some(&canonical) = translation.get(&edge.target_context) {
                edge.target_context = canonical;
            }
            match self.outgoing.entry(edge) {
                Entry::Occupied(mut occupied) => {
                    // Two formerly distinct edges collapsed: the duplicate
                    // count absorbs the other edge and its own duplicates.
                    *occupied.get_mut() += duplicates + 1;
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(duplicates);
                }
            }
        }
    }
}

/// All transitions between one ordered pair of locks, regardless of thread
/// and context. The coarse view for "could these two locks ever be part of
/// a deadlock, whichever path got them there".
#[derive(Debug)]
pub struct LockMultiEdge {
    pub source: LockId,
    pub target: LockId,
    pub transitions: Vec<(LockEdge, u64)>,
}

impl LockMultiEdge {
    /// Group edges by their (source, target) pair, preserving first-seen
    /// order of the pairs.
    pub fn group(edges: impl IntoIterator<Item = (LockEdge, u64)>) -> Vec<LockMultiEdge> {
        let mut groups: Vec<LockMultiEdge> = Vec::new();
        let mut index: FxHashMap<(LockId, LockId), usize> = FxHashMap::default();
        for (edge, duplicates) in edges {
            let key = (edge.source, edge.target);
            let at = *index.entry(key).or_insert_with(|| {
                groups.push(LockMultiEdge {
                    source: edge.source,
                    target: edge.target,
                    transitions: Vec::new(),
                });
                groups.len() - 1
            });
            groups[at].transitions.push((edge, duplicates));
        }
        groups
    }

    /// The single thread all transitions belong to, or `None` if several
    /// threads contributed.
    pub fn unique_thread_id(&self) -> Option<ThreadId> {
        let mut transitions = self.transitions.iter();
        let (first, _) = transitions.next()?;
        let thread_id = first.thread_id;
        transitions
            .all(|(edge, _)| edge.thread_id == thread_id)
            .then_some(thread_id)
    }
}

/// Builds the node arena from the event stream.
#[derive(Default)]
pub struct LockGraphBuilder {
    nodes: FxHashMap<LockId, LockNode>,
}

impl LockGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn node_mut(&mut self, lock_id: LockId) -> &mut LockNode {
        self.nodes
            .entry(lock_id)
            .or_insert_with(|| LockNode::new(lock_id))
    }

    /// Fold one event into the graph. Every record materializes its target
    /// node; only records with a source contribute an edge.
    pub fn add_event(&mut self, event: &LockEvent) {
        self.node_mut(event.target_lock_id);
        if event.has_source() {
            let edge = LockEdge {
                source: event.source_lock_id,
                target: event.target_lock_id,
                thread_id: event.thread_id,
                source_context: event.source_context_id,
                target_context: event.target_context_id,
            };
            self.node_mut(event.source_lock_id).add_outgoing_edge(edge);
        }
    }

    pub fn nodes(&self) -> &FxHashMap<LockId, LockNode> {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut FxHashMap<LockId, LockNode> {
        &mut self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn unique_edge_count(&self) -> u64 {
        self.nodes
            .values()
            .map(|node| node.unique_edge_count() as u64)
            .sum()
    }

    pub fn duplicated_edge_count(&self) -> u64 {
        self.nodes
            .values()
            .map(LockNode::duplicated_edge_count)
            .sum()
    }

    /// Drop the whole arena. Called once the analysis no longer needs the
    /// full graph, to bound peak memory before the heavier passes.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

impl LockEventSink for LockGraphBuilder {
    fn on_lock_event(&mut self, event: &LockEvent) -> Result<(), StoreError> {
        self.add_event(event);
        Ok(())
    }
}
