//! Normalization of context IDs before whole-graph reporting.
//!
//! The recorder's context cache may shed entries under pressure, so the
//! same locking context can end up in the store under several offsets.
//! Edges that differ only in such offsets are the same edge. This pass
//! builds a translation from every in-use context ID to one canonical ID
//! per distinct context value (the smallest offset), rewrites every edge
//! through it, and lets the nodes re-merge whatever becomes identical.

use crate::core::analyzer::graph::LockNode;
use crate::core::storage::{ContextFileReader, StoreError};
use crate::core::types::{ContextId, LockId, LockingContext};
use fxhash::FxHashMap;
use std::collections::BTreeSet;

/// Rewrite all edges of `nodes` onto canonical context IDs.
pub fn merge_duplicated_edges(
    nodes: &mut FxHashMap<LockId, LockNode>,
    reader: &mut ContextFileReader,
) -> Result<(), StoreError> {
    let mut translation: FxHashMap<ContextId, ContextId> = FxHashMap::default();
    for node in nodes.values() {
        for edge in node.outgoing_edges() {
            translation.insert(edge.source_context, edge.source_context);
            translation.insert(edge.target_context, edge.target_context);
        }
    }

    let mut ids_by_value: FxHashMap<LockingContext, BTreeSet<ContextId>> = FxHashMap::default();
    for &id in translation.keys() {
        ids_by_value
            .entry(reader.read_context(id)?)
            .or_default()
            .insert(id);
    }

    for ids in ids_by_value.values() {
        if ids.len() > 1 {
            let mut ids = ids.iter();
            let Some(&canonical) = ids.next() else {
                continue;
            };
            for &id in ids {
                translation.insert(id, canonical);
            }
        }
    }

    for node in nodes.values_mut() {
        node.translate_context_ids(&translation);
    }
    Ok(())
}
