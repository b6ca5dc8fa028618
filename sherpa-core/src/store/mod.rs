pub mod schema;
pub mod sqlite;
pub mod traits;

pub use traits::SherpaStore;

use std::collections::HashMap;

use crate::types::{ExecutionTrace, TraceId};

/// A trace with its children, as produced by [`build_hierarchy`].
#[derive(Debug, Clone)]
pub struct TraceTree {
    pub trace: ExecutionTrace,
    pub children: Vec<TraceTree>,
}

/// Assemble parent/child trees from a flat trace list. Traces whose parent
/// is absent from the input are treated as roots. Children are ordered by
/// `started_at` ascending.
pub fn build_hierarchy(traces: Vec<ExecutionTrace>) -> Vec<TraceTree> {
    let ids: std::collections::HashSet<TraceId> =
        traces.iter().map(|t| t.trace_id).collect();

    let mut children_of: HashMap<TraceId, Vec<ExecutionTrace>> = HashMap::new();
    let mut roots: Vec<ExecutionTrace> = Vec::new();
    for trace in traces {
        match trace.parent_trace_id {
            Some(parent) if ids.contains(&parent) => {
                children_of.entry(parent).or_default().push(trace);
            }
            // Orphans become roots.
            _ => roots.push(trace),
        }
    }

    fn attach(
        trace: ExecutionTrace,
        children_of: &mut HashMap<TraceId, Vec<ExecutionTrace>>,
    ) -> TraceTree {
        let mut kids = children_of.remove(&trace.trace_id).unwrap_or_default();
        kids.sort_by_key(|t| t.started_at);
        TraceTree {
            trace,
            children: kids
                .into_iter()
                .map(|c| attach(c, children_of))
                .collect(),
        }
    }

    roots.sort_by_key(|t| t.started_at);
    roots
        .into_iter()
        .map(|r| attach(r, &mut children_of))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TraceKind;
    use chrono::{Duration, Utc};

    fn trace(id: TraceId, parent: Option<TraceId>, offset_s: i64) -> ExecutionTrace {
        let start = Utc::now() + Duration::seconds(offset_s);
        ExecutionTrace {
            trace_id: id,
            parent_trace_id: parent,
            kind: TraceKind::ToolRun,
            node_id: "tool".into(),
            started_at: start,
            finished_at: start + Duration::seconds(1),
            success: true,
            executed_path: vec![],
            intent_text: None,
            intent_embedding: None,
            priority: 0.5,
            user_id: None,
            agent_id: None,
            decisions: vec![],
            task_results: vec![],
        }
    }

    #[test]
    fn hierarchy_nests_children_in_time_order() {
        let root = TraceId::generate();
        let a = TraceId::generate();
        let b = TraceId::generate();
        let trees = build_hierarchy(vec![
            trace(b, Some(root), 20),
            trace(root, None, 0),
            trace(a, Some(root), 10),
        ]);
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].trace.trace_id, root);
        let kids: Vec<_> = trees[0].children.iter().map(|c| c.trace.trace_id).collect();
        assert_eq!(kids, vec![a, b]);
    }

    #[test]
    fn orphans_become_roots() {
        let missing_parent = TraceId::generate();
        let orphan = TraceId::generate();
        let trees = build_hierarchy(vec![trace(orphan, Some(missing_parent), 0)]);
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].trace.trace_id, orphan);
    }
}
