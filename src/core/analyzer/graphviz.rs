//! Graphviz text rendering of analyzed lock-order graphs.

use crate::core::analyzer::ReportEdge;
use crate::core::types::Lock;
use std::fmt::Write;

/// Render `edges` as a Graphviz digraph.
///
/// With `include_packages` unset, module paths are stripped from class
/// names to keep the nodes readable; the object IDs still tell instances
/// apart.
pub fn generate(edges: &[ReportEdge], include_packages: bool) -> String {
    let mut out = String::new();
    out.push_str("digraph lockweave {\n");
    out.push_str("  node [shape=box, fontsize=10];\n");
    for edge in edges {
        let label = format!(
            "thread: {}\\nholding: {}\\nin: {}\\ntaking: {}\\nin: {}{}",
            edge.thread_id,
            escape(edge.source_context.lock_reference()),
            escape(edge.source_context.method_with_class()),
            escape(edge.target_context.lock_reference()),
            escape(edge.target_context.method_with_class()),
            if edge.duplicates > 0 {
                format!("\\nseen {} more time(s)", edge.duplicates)
            } else {
                String::new()
            },
        );
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\" [fontsize=10, label=\"{}\"];",
            escape(&node_name(&edge.source, include_packages)),
            escape(&node_name(&edge.target, include_packages)),
            label,
        );
    }
    out.push_str("}\n");
    out
}

fn node_name(lock: &Lock, include_packages: bool) -> String {
    if include_packages {
        lock.to_string()
    } else {
        let short = lock
            .class_name()
            .rsplit("::")
            .next()
            .unwrap_or(lock.class_name());
        format!("{}@{:X}", short, lock.object_id() as u32)
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::LockingContext;

    #[test]
    fn test_generate_renders_edges() {
        let edge = ReportEdge {
            source: Lock::new("bank::Account", 0x10),
            target: Lock::new("bank::Ledger", 0x20),
            thread_id: 3,
            source_context: LockingContext::new("worker", "self.account", "bank::transfer"),
            target_context: LockingContext::new("worker", "self.ledger", "bank::settle"),
            duplicates: 2,
        };
        let dot = generate(&[edge], false);
        assert!(dot.starts_with("digraph lockweave {"));
        assert!(dot.contains("\"Account@10\" -> \"Ledger@20\""));
        assert!(dot.contains("thread: 3"));
        assert!(dot.contains("seen 2 more time(s)"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn test_include_packages_keeps_full_names() {
        let edge = ReportEdge {
            source: Lock::new("bank::Account", 1),
            target: Lock::new("bank::Ledger", 2),
            thread_id: 1,
            source_context: LockingContext::new("t", "a", "m"),
            target_context: LockingContext::new("t", "b", "m"),
            duplicates: 0,
        };
        let dot = generate(&[edge], true);
        assert!(dot.contains("bank::Account@1"));
    }
}
