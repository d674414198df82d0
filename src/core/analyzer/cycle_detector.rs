//! Exhaustive enumeration of simple cycles in the lock-order graph.
//!
//! # How it works
//!
//! A depth-first walk keeps the current path as parallel node and edge
//! stacks. Whenever the edge under inspection points back at a node on the
//! path, the edges from that node to the top of the stack (plus the edge
//! itself) form a cycle.
//!
//! Two global sets bound the work: visited nodes only gate which nodes
//! start a fresh walk, and visited edges prune edges that have already
//! been fully explored. The twist is in how a found cycle updates the
//! visited-edge set: only the cycle's *first* edge stays marked, and every
//! other edge of the cycle is unmarked again — even if an earlier cycle
//! had marked it. Without this re-admission, alternate cycles sharing all
//! but one edge with an already-found cycle would be missed. The price is
//! super-linear work on graphs with many alternative paths between the
//! same nodes; observed lock graphs are sparse enough that completeness
//! wins.

use crate::core::analyzer::cycle::Cycle;
use crate::core::analyzer::graph::{LockEdge, LockNode};
use crate::core::storage::{ContextFileReader, StoreError};
use crate::core::types::LockId;
use crate::core::utils::{Counter, MaxValueCounter};
use fxhash::{FxHashMap, FxHashSet};
use tracing::info;

/// Finds and manages the cycles of a node arena.
pub struct CycleDetector {
    cycles: Vec<Cycle>,
    seen: FxHashSet<Cycle>,
    max_depth: MaxValueCounter,
    max_cycle_depth: MaxValueCounter,
    created_cycle_values: Counter,
}

impl Default for CycleDetector {
    fn default() -> Self {
        Self::new()
    }
}

struct Frame {
    edges: Vec<LockEdge>,
    next: usize,
}

impl CycleDetector {
    pub fn new() -> Self {
        CycleDetector {
            cycles: Vec::new(),
            seen: FxHashSet::default(),
            max_depth: MaxValueCounter::default(),
            max_cycle_depth: MaxValueCounter::default(),
            created_cycle_values: Counter::new("created cycle values", 100_000),
        }
    }

    /// Walk every component of the graph and collect all distinct simple
    /// cycles, then raise the cycle classification of every node touched
    /// by one.
    pub fn analyze(&mut self, nodes: &mut FxHashMap<LockId, LockNode>) {
        let mut visited_nodes: FxHashSet<LockId> = FxHashSet::default();
        let mut visited_edges: FxHashSet<LockEdge> = FxHashSet::default();

        let mut roots: Vec<LockId> = nodes.keys().copied().collect();
        roots.sort_unstable();
        for root in roots {
            if !visited_nodes.contains(&root) {
                self.walk(root, nodes, &mut visited_nodes, &mut visited_edges);
            }
        }

        for cycle in &self.cycles {
            cycle.update_node_cycle_status(nodes);
        }
    }

    fn outgoing_sorted(nodes: &FxHashMap<LockId, LockNode>, id: LockId) -> Vec<LockEdge> {
        let mut edges: Vec<LockEdge> = match nodes.get(&id) {
            Some(node) => node.outgoing_edges().copied().collect(),
            None => Vec::new(),
        };
        edges.sort_unstable();
        edges
    }

    fn walk(
        &mut self,
        root: LockId,
        nodes: &FxHashMap<LockId, LockNode>,
        visited_nodes: &mut FxHashSet<LockId>,
        visited_edges: &mut FxHashSet<LockEdge>,
    ) {
        visited_nodes.insert(root);
        let mut node_stack: Vec<LockId> = vec![root];
        let mut edge_stack: Vec<LockEdge> = Vec::new();
        let mut frames = vec![Frame {
            edges: Self::outgoing_sorted(nodes, root),
            next: 0,
        }];

        while let Some(frame) = frames.last_mut() {
            if frame.next >= frame.edges.len() {
                frames.pop();
                node_stack.pop();
                // The root frame was not entered through an edge.
                if !frames.is_empty() {
                    edge_stack.pop();
                }
                continue;
            }
            let edge = frame.edges[frame.next];
            frame.next += 1;

            if visited_edges.contains(&edge) {
                continue;
            }
            self.max_depth.observe(node_stack.len());

            if let Some(position) = node_stack.iter().position(|&node| node == edge.target) {
                // The path from `position` up, closed by this edge.
                let mut cycle_edges: Vec<LockEdge> = edge_stack[position..].to_vec();
                cycle_edges.push(edge);
                self.record_cycle(cycle_edges, visited_edges);
            } else {
                visited_edges.insert(edge);
                visited_nodes.insert(edge.target);
                node_stack.push(edge.target);
                edge_stack.push(edge);
                frames.push(Frame {
                    edges: Self::outgoing_sorted(nodes, edge.target),
                    next: 0,
                });
            }
        }
    }

    fn record_cycle(&mut self, cycle_edges: Vec<LockEdge>, visited_edges: &mut FxHashSet<LockEdge>) {
        self.created_cycle_values.increment();
        self.max_cycle_depth.observe(cycle_edges.len());

        // Keeping the first edge of the cycle marked visited avoids
        // repeated checks that cannot find anything new. The other edges
        // MUST be unmarked again, even when an earlier cycle marked them,
        // or alternative cycles through them would never be walked.
        for edge in &cycle_edges[1..] {
            visited_edges.remove(edge);
        }

        if cycle_edges.len() < 2 {
            return;
        }
        let cycle = Cycle::new(cycle_edges);
        if self.seen.insert(cycle.clone()) {
            self.cycles.push(cycle);
        }
    }

    /// The distinct cycles found so far, in discovery order.
    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    /// Deepest path the walk reached.
    pub fn max_depth(&self) -> usize {
        self.max_depth.value()
    }

    /// Longest cycle found.
    pub fn max_cycle_depth(&self) -> usize {
        self.max_cycle_depth.value()
    }

    /// Distinct edges appearing in any cycle.
    pub fn number_of_cycle_edges(&self) -> usize {
        let mut edges: FxHashSet<&LockEdge> = FxHashSet::default();
        for cycle in &self.cycles {
            edges.extend(cycle.edges());
        }
        edges.len()
    }

    /// Distinct nodes appearing in any cycle.
    pub fn number_of_cycle_nodes(&self) -> usize {
        let mut nodes: FxHashSet<LockId> = FxHashSet::default();
        for cycle in &self.cycles {
            for edge in cycle.edges() {
                nodes.insert(edge.source);
                nodes.insert(edge.target);
            }
        }
        nodes.len()
    }

    /// Drop cycles formed by a single thread. Returns how many went.
    pub fn remove_single_threaded_cycles(&mut self) -> usize {
        let before = self.cycles.len();
        self.cycles.retain(|cycle| !cycle.is_single_threaded());
        let removed = before - self.cycles.len();
        info!("ignoring {removed} single threaded cycle(s)");
        removed
    }

    /// Drop cycles that are alike an earlier-found cycle. Returns how many
    /// went.
    pub fn remove_alike_cycles(
        &mut self,
        reader: &mut ContextFileReader,
    ) -> Result<usize, StoreError> {
        let candidates = std::mem::take(&mut self.cycles);
        let mut removed = 0;
        for cycle in candidates {
            if Self::contains_alike(&cycle, &self.cycles, reader)? {
                removed += 1;
            } else {
                self.cycles.push(cycle);
            }
        }
        info!("ignoring {removed} almost identical cycle(s)");
        Ok(removed)
    }

    fn contains_alike(
        cycle: &Cycle,
        retained: &[Cycle],
        reader: &mut ContextFileReader,
    ) -> Result<bool, StoreError> {
        for other in retained {
            if cycle.alike(other, reader)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Group cycles that run through identical lock sets and return each
    /// group's edges combined — one graph per lock set for reporting.
    pub fn merge_cycles_with_identical_locks(&self) -> Vec<Vec<LockEdge>> {
        let mut groups: Vec<FxHashSet<LockEdge>> = Vec::new();
        let mut index: FxHashMap<Vec<LockId>, usize> = FxHashMap::default();
        for cycle in &self.cycles {
            let mut key: Vec<LockId> = cycle.nodes().into_iter().collect();
            key.sort_unstable();
            let at = *index.entry(key).or_insert_with(|| {
                groups.push(FxHashSet::default());
                groups.len() - 1
            });
            groups[at].extend(cycle.edges().iter().copied());
        }
        groups
            .into_iter()
            .map(|group| {
                let mut edges: Vec<LockEdge> = group.into_iter().collect();
                edges.sort_unstable();
                edges
            })
            .collect()
    }
}
