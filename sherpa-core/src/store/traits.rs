use std::collections::HashMap;

use sherpa_graphs::{EdgeRecord, NodeRecord};

use crate::types::{ExecutionTrace, TraceId, TraceInput, TraceStoreStats};

/// The persistence abstraction: append-only trace log, hypergraph
/// snapshots, and named model-parameter blobs.
#[async_trait::async_trait]
pub trait SherpaStore: Send + Sync + std::fmt::Debug {
    // ── Traces ─────────────────────────────────────────────────────

    /// Persist a trace: assigns the id, clamps priority into the replay
    /// bounds (neutral 0.5 when absent), sanitizes task results. Returns
    /// the stored record.
    async fn save_trace(&self, input: TraceInput) -> crate::error::Result<ExecutionTrace>;

    async fn get_trace(&self, id: TraceId) -> crate::error::Result<Option<ExecutionTrace>>;

    /// Direct children of a trace, ordered by `started_at` ascending.
    async fn children_of(&self, id: TraceId) -> crate::error::Result<Vec<ExecutionTrace>>;

    /// Ids and priorities of traces at or above `min_priority` (the PER
    /// sampling pool).
    async fn trace_priorities(
        &self,
        min_priority: f64,
    ) -> crate::error::Result<Vec<(TraceId, f64)>>;

    /// Fetch a batch by id, preserving input order for present ids.
    async fn traces_by_ids(&self, ids: &[TraceId]) -> crate::error::Result<Vec<ExecutionTrace>>;

    /// All traces whose executed path (or own node) mentions the node.
    async fn traces_mentioning(&self, node_id: &str)
    -> crate::error::Result<Vec<ExecutionTrace>>;

    /// Per-node usage counts over all executed paths.
    async fn usage_counts(&self) -> crate::error::Result<HashMap<String, u64>>;

    /// Redact user-tied fields for all traces of `user_id`. Idempotent;
    /// returns the number of traces touched by this call.
    async fn anonymize_user_traces(&self, user_id: &str) -> crate::error::Result<u64>;

    async fn stats(&self) -> crate::error::Result<TraceStoreStats>;

    // ── Hypergraph snapshot ────────────────────────────────────────

    /// Replace the persisted snapshot with the given records.
    async fn save_graph_snapshot(
        &self,
        nodes: &[NodeRecord],
        edges: &[EdgeRecord],
    ) -> crate::error::Result<()>;

    async fn load_graph_snapshot(
        &self,
    ) -> crate::error::Result<(Vec<NodeRecord>, Vec<EdgeRecord>)>;

    // ── Model parameters ───────────────────────────────────────────

    /// Store a named parameter blob (upsert).
    async fn save_model_params(&self, name: &str, blob: &[u8]) -> crate::error::Result<()>;

    async fn load_model_params(&self, name: &str) -> crate::error::Result<Option<Vec<u8>>>;

    // ── Checkpoints ────────────────────────────────────────────────

    async fn get_checkpoint(&self, key: &str) -> crate::error::Result<Option<String>>;

    async fn set_checkpoint(&self, key: &str, value: &str) -> crate::error::Result<()>;
}
