//! Offline analysis of a recording.
//!
//! Replays the event log into an in-memory lock-order graph, enumerates
//! its cycles, collapses near-duplicates, and resolves everything back to
//! lock and context values for reporting. Runs single-threaded over data
//! already on disk; errors here are ordinary failures for the caller, not
//! recorder concerns.

pub mod cycle;
pub mod cycle_detector;
pub mod duplicates;
pub mod graph;
pub mod graphviz;

pub use cycle::Cycle;
pub use cycle_detector::CycleDetector;
pub use graph::{CycleType, LockEdge, LockGraphBuilder, LockMultiEdge, LockNode};

use crate::core::storage::{ContextFileReader, EventFileReader, LockEventSink, StoreError};
use crate::core::types::{Lock, LockEvent, LockingContext, ThreadId};
use anyhow::{Context, Result};
use chrono::Utc;
use fxhash::FxHashMap;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// What the analysis should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputMode {
    /// Every edge of the whole graph, in or out of cycles.
    AllEdges,
    /// All cycles. Single-threaded cycles cannot deadlock by themselves,
    /// but code exercised by one thread today may meet a second thread
    /// tomorrow, so they are included by default.
    AllCycles,
    /// Only cycles spanning at least two threads.
    MultiThreadedCyclesOnly,
}

/// One edge with its lock and context records resolved from the store.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEdge {
    pub source: Lock,
    pub target: Lock,
    pub thread_id: ThreadId,
    pub source_context: LockingContext,
    pub target_context: LockingContext,
    pub duplicates: u64,
}

/// One cycle, resolved.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub single_threaded: bool,
    pub edges: Vec<ReportEdge>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct AnalysisStats {
    pub parsed_events: u64,
    /// Events whose IDs did not resolve in the context store — the tail
    /// of a crashed run.
    pub skipped_events: u64,
    pub truncated_log: bool,
    pub nodes: usize,
    pub unique_edges: u64,
    pub duplicated_edges: u64,
    pub cycles_found: usize,
    pub edges_in_cycles: usize,
    pub nodes_in_cycles: usize,
    pub max_cycle_depth: usize,
    pub max_graph_depth: usize,
    pub single_threaded_cycles_removed: usize,
    pub alike_cycles_removed: usize,
}

/// Everything an analysis run produces.
#[derive(Debug, Serialize)]
pub struct AnalysisReport {
    pub mode: OutputMode,
    pub timestamp: String,
    pub stats: AnalysisStats,
    /// The surviving cycles after mode filtering and alike-merging.
    pub cycles: Vec<CycleReport>,
    /// Cycle edges grouped by identical lock sets — one graph per group.
    /// Empty in [`OutputMode::AllEdges`].
    pub cycle_groups: Vec<Vec<ReportEdge>>,
    /// The whole graph. Only populated in [`OutputMode::AllEdges`].
    pub all_edges: Vec<ReportEdge>,
}

/// Replay a recording and analyze it.
///
/// All-or-nothing: any I/O or format failure aborts the run with the file
/// path attached.
pub fn analyze(
    event_log: impl AsRef<Path>,
    context_store: impl AsRef<Path>,
    mode: OutputMode,
) -> Result<AnalysisReport> {
    let event_log = event_log.as_ref();
    let context_store = context_store.as_ref();

    let mut reader = ContextFileReader::open(context_store)
        .with_context(|| format!("failed to open context store {}", context_store.display()))?;
    let mut builder = LockGraphBuilder::new();

    let (summary, skipped_events) = {
        let mut sink = CheckedSink {
            builder: &mut builder,
            reader: &mut reader,
            skipped: 0,
        };
        let summary = EventFileReader::replay(event_log, &mut sink)
            .with_context(|| format!("failed to read event log {}", event_log.display()))?;
        (summary, sink.skipped)
    };

    let mut stats = AnalysisStats {
        parsed_events: summary.parsed_events,
        skipped_events,
        truncated_log: summary.truncated,
        nodes: builder.node_count(),
        unique_edges: builder.unique_edge_count(),
        duplicated_edges: builder.duplicated_edge_count(),
        ..AnalysisStats::default()
    };
    info!(
        "loaded {} nodes and {} edges ({} duplicated) from {} events",
        stats.nodes, stats.unique_edges, stats.duplicated_edges, stats.parsed_events
    );

    let mut detector = CycleDetector::new();
    detector.analyze(builder.nodes_mut());
    stats.cycles_found = detector.cycles().len();
    stats.edges_in_cycles = detector.number_of_cycle_edges();
    stats.nodes_in_cycles = detector.number_of_cycle_nodes();
    stats.max_cycle_depth = detector.max_cycle_depth();
    stats.max_graph_depth = detector.max_depth();

    // Duplicate counts live on the nodes, which the cycles-only modes
    // clear before the merge passes; capture the counts cycle edges need.
    let mut duplicate_counts: FxHashMap<LockEdge, u64> = FxHashMap::default();
    for cycle in detector.cycles() {
        for edge in cycle.edges() {
            if let Some(node) = builder.nodes().get(&edge.source) {
                duplicate_counts.insert(*edge, node.duplicates_of(edge));
            }
        }
    }

    let mut report = AnalysisReport {
        mode,
        timestamp: Utc::now().to_rfc3339(),
        stats: AnalysisStats::default(),
        cycles: Vec::new(),
        cycle_groups: Vec::new(),
        all_edges: Vec::new(),
    };

    match mode {
        OutputMode::AllEdges => {
            duplicates::merge_duplicated_edges(builder.nodes_mut(), &mut reader)
                .context("failed to normalize duplicated edges")?;
            // Group parallel transitions between the same lock pair so the
            // whole-graph output reads pair by pair.
            let mut node_ids: Vec<_> = builder.nodes().keys().copied().collect();
            node_ids.sort_unstable();
            let mut edges: Vec<(LockEdge, u64)> = Vec::new();
            for node_id in node_ids {
                let mut outgoing: Vec<(LockEdge, u64)> = builder.nodes()[&node_id]
                    .edges_with_duplicates()
                    .map(|(edge, duplicates)| (*edge, duplicates))
                    .collect();
                outgoing.sort_unstable_by_key(|(edge, _)| *edge);
                edges.extend(outgoing);
            }
            for multi_edge in LockMultiEdge::group(edges) {
                for (edge, duplicates) in &multi_edge.transitions {
                    report
                        .all_edges
                        .push(resolve_edge(&mut reader, edge, *duplicates)?);
                }
            }
            report.cycles = resolve_cycles(&mut reader, &detector, &duplicate_counts)?;
        }
        OutputMode::AllCycles | OutputMode::MultiThreadedCyclesOnly => {
            if mode == OutputMode::MultiThreadedCyclesOnly {
                stats.single_threaded_cycles_removed = detector.remove_single_threaded_cycles();
            }
            // The full graph is no longer needed; release it before the
            // merge passes to bound peak memory.
            builder.clear();
            stats.alike_cycles_removed = detector
                .remove_alike_cycles(&mut reader)
                .context("failed to merge alike cycles")?;

            report.cycles = resolve_cycles(&mut reader, &detector, &duplicate_counts)?;
            for group in detector.merge_cycles_with_identical_locks() {
                let mut edges = Vec::with_capacity(group.len());
                for edge in group {
                    let duplicates = duplicate_counts.get(&edge).copied().unwrap_or(0);
                    edges.push(resolve_edge(&mut reader, &edge, duplicates)?);
                }
                report.cycle_groups.push(edges);
            }
        }
    }

    report.stats = stats;
    Ok(report)
}

fn resolve_cycles(
    reader: &mut ContextFileReader,
    detector: &CycleDetector,
    duplicate_counts: &FxHashMap<LockEdge, u64>,
) -> Result<Vec<CycleReport>, StoreError> {
    let mut cycles = Vec::with_capacity(detector.cycles().len());
    for cycle in detector.cycles() {
        let mut edges = Vec::with_capacity(cycle.len());
        for edge in cycle.edges() {
            let duplicates = duplicate_counts.get(edge).copied().unwrap_or(0);
            edges.push(resolve_edge(reader, edge, duplicates)?);
        }
        cycles.push(CycleReport {
            single_threaded: cycle.is_single_threaded(),
            edges,
        });
    }
    Ok(cycles)
}

fn resolve_edge(
    reader: &mut ContextFileReader,
    edge: &LockEdge,
    duplicates: u64,
) -> Result<ReportEdge, StoreError> {
    Ok(ReportEdge {
        source: reader.read_lock(edge.source)?,
        target: reader.read_lock(edge.target)?,
        thread_id: edge.thread_id,
        source_context: reader.read_context(edge.source_context)?,
        target_context: reader.read_context(edge.target_context)?,
        duplicates,
    })
}

/// Forwards replayed events to the graph builder, dropping records whose
/// IDs do not resolve in the context store. Those appear when a crash cut
/// the store short while the event log kept going; the surviving prefix
/// is still worth analyzing.
struct CheckedSink<'a> {
    builder: &'a mut LockGraphBuilder,
    reader: &'a mut ContextFileReader,
    skipped: u64,
}

impl CheckedSink<'_> {
    fn resolves(&mut self, event: &LockEvent) -> Result<bool, StoreError> {
        let mut ids = vec![
            (event.target_lock_id, true),
            (event.target_context_id, false),
        ];
        if event.has_source() {
            ids.push((event.source_lock_id, true));
            ids.push((event.source_context_id, false));
        }
        for (id, is_lock) in ids {
            let outcome = if is_lock {
                self.reader.read_lock(id).map(|_| ())
            } else {
                self.reader.read_context(id).map(|_| ())
            };
            match outcome {
                Ok(()) => {}
                Err(StoreError::InvalidOffset { offset }) => {
                    warn!("cannot find record at offset {offset} in the context store, ignoring event");
                    return Ok(false);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }
}

impl LockEventSink for CheckedSink<'_> {
    fn on_lock_event(&mut self, event: &LockEvent) -> Result<(), StoreError> {
        if self.resolves(event)? {
            self.builder.add_event(event);
        } else {
            self.skipped += 1;
        }
        Ok(())
    }
}
