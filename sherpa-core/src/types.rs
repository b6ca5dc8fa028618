use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Trace identity ─────────────────────────────────────────────────

/// Stable identifier of an execution trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub uuid::Uuid);

impl TraceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TraceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

// ── Traces ─────────────────────────────────────────────────────────

/// What kind of execution produced a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceKind {
    ToolRun,
    CapabilityRun,
}

impl TraceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolRun => "ToolRun",
            Self::CapabilityRun => "CapabilityRun",
        }
    }
}

impl std::fmt::Display for TraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A branch decision recorded during execution. Not consumed by the scorer;
/// kept for reconstructing branch choices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_node_id: String,
    pub outcome: DecisionOutcome,
    /// Opaque condition expression.
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "label", rename_all = "lowercase")]
pub enum DecisionOutcome {
    True,
    False,
    Case(String),
}

/// One completed execution, as persisted. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub trace_id: TraceId,
    pub parent_trace_id: Option<TraceId>,
    pub kind: TraceKind,
    /// The tool or capability this trace executed.
    pub node_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    /// Sibling nodes visited within this trace, in order.
    pub executed_path: Vec<String>,
    pub intent_text: Option<String>,
    pub intent_embedding: Option<Embedding>,
    /// Replay priority in `[0.01, 1.0]`.
    pub priority: f64,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub decisions: Vec<Decision>,
    pub task_results: Vec<TaskResult>,
}

impl ExecutionTrace {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Input for saving a trace; the store assigns the id and clamps priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceInput {
    pub parent_trace_id: Option<TraceId>,
    pub kind: TraceKind,
    pub node_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub executed_path: Vec<String>,
    #[serde(default)]
    pub intent_text: Option<String>,
    #[serde(default)]
    pub intent_embedding: Option<Embedding>,
    /// Absent on cold start; the store substitutes the neutral default.
    #[serde(default)]
    pub priority: Option<f64>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub task_results: Vec<TaskResult>,
}

/// Output captured from a tool run, sanitized before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub tool: String,
    pub output: TaskValue,
}

/// Typed value tree for dynamically-shaped task payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<TaskValue>),
    Object(BTreeMap<String, TaskValue>),
}

/// Sanitization limits for task payloads.
pub const MAX_TASK_STRING_LEN: usize = 2048;
pub const MAX_TASK_DEPTH: usize = 8;

impl TaskValue {
    /// Truncate long strings and cut the tree at the depth limit; payloads
    /// past the limit collapse to `Null`.
    pub fn sanitized(self) -> Self {
        self.sanitize_at(0)
    }

    fn sanitize_at(self, depth: usize) -> Self {
        if depth >= MAX_TASK_DEPTH {
            return Self::Null;
        }
        match self {
            Self::String(s) if s.len() > MAX_TASK_STRING_LEN => {
                let mut cut = MAX_TASK_STRING_LEN;
                while !s.is_char_boundary(cut) {
                    cut -= 1;
                }
                Self::String(s[..cut].to_string())
            }
            Self::Array(items) => Self::Array(
                items
                    .into_iter()
                    .map(|v| v.sanitize_at(depth + 1))
                    .collect(),
            ),
            Self::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, v.sanitize_at(depth + 1)))
                    .collect(),
            ),
            other => other,
        }
    }
}

impl From<serde_json::Value> for TaskValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

// ── Trace statistics ───────────────────────────────────────────────

/// Per-tool statistics derived from the trace log. All rates are in
/// `[0, 1]`; `path_variance` and `avg_path_length_to_success` are
/// non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceStats {
    pub historical_success_rate: f64,
    pub contextual_success_rate: f64,
    pub intent_similar_success_rate: f64,
    pub recency_score: f64,
    pub usage_frequency: f64,
    pub sequence_position: f64,
    pub path_variance: f64,
    /// Mean steps-to-end over successful traces, rounded to an integer.
    pub avg_path_length_to_success: f64,
}

/// Neutral defaults substituted below the minimum sample size.
pub const DEFAULT_TRACE_STATS: TraceStats = TraceStats {
    historical_success_rate: 0.5,
    contextual_success_rate: 0.5,
    intent_similar_success_rate: 0.5,
    recency_score: 0.0,
    usage_frequency: 0.0,
    sequence_position: 0.5,
    path_variance: 0.0,
    avg_path_length_to_success: 0.0,
};

impl Default for TraceStats {
    fn default() -> Self {
        DEFAULT_TRACE_STATS
    }
}

impl TraceStats {
    /// Flattened scalar vector, in the order the scorer consumes.
    pub fn as_vec(&self) -> [f64; 8] {
        [
            self.historical_success_rate,
            self.contextual_success_rate,
            self.intent_similar_success_rate,
            self.recency_score,
            self.usage_frequency,
            self.sequence_position,
            self.path_variance,
            self.avg_path_length_to_success,
        ]
    }
}

// ── Graph features & feature bundle ────────────────────────────────

/// Topological signals for one candidate, computed against the current
/// graph version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphFeatures {
    pub pagerank: f64,
    /// Spectral cluster id, if clustering has run.
    pub cluster_id: Option<u32>,
    /// Candidate shares a spectral cluster with some context node.
    pub cluster_co_membership: bool,
    /// Normalized co-occurrence with the context set.
    pub co_occurrence: f64,
    pub adamic_adar: f64,
    pub heat_diffusion: f64,
    /// Graph version these signals were computed at.
    pub graph_version: u64,
}

/// Everything the attention scorer sees for one (intent, candidate) pair.
#[derive(Debug, Clone)]
pub struct TraceFeatureBundle {
    pub candidate_id: String,
    pub candidate_embedding: Embedding,
    /// Mean-pooled context embeddings; zero vector when the context is empty.
    pub context_mean: Vec<f32>,
    pub has_context: bool,
    pub stats: TraceStats,
    pub graph: GraphFeatures,
}

// ── Scoring outputs ────────────────────────────────────────────────

/// One scored candidate from the attention model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub id: String,
    /// Calibrated score in `[0, 1]`.
    pub score: f32,
    /// Per-head attention weights (softmax-normalized).
    pub head_weights: Vec<f32>,
}

/// A ranked capability with its explanation, as surfaced to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCapability {
    pub id: String,
    pub score: f32,
    pub head_weights: Vec<f32>,
    /// Human-readable account of the dominant signals.
    pub rationale: String,
    /// Semantic/graph blend coefficient used for this score.
    pub alpha: f64,
}

/// The predictor's answer to "what should run next".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub next_node: String,
    pub capability: String,
    /// Clipped to `[0, max_confidence]`.
    pub confidence: f32,
    /// Tool path from the last context node to the capability entry.
    pub path: Vec<String>,
}

// ── Engine statistics ──────────────────────────────────────────────

/// Aggregate trace-store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceStoreStats {
    pub total: u64,
    pub successful: u64,
    pub avg_duration_ms: f64,
    pub avg_priority: f64,
}

impl Default for TraceStoreStats {
    fn default() -> Self {
        Self {
            total: 0,
            successful: 0,
            avg_duration_ms: 0.0,
            avg_priority: 0.5,
        }
    }
}

/// Engine-wide metrics surfaced by `GetStats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub node_count: u64,
    pub edge_count: u64,
    pub nodes_by_kind: BTreeMap<String, u64>,
    pub edges_by_type: BTreeMap<String, u64>,
    pub graph_version: u64,
    pub avg_pagerank: f64,
    pub traces: TraceStoreStats,
    pub stats_cache_hit_rate: f64,
    /// Mean semantic/graph blend coefficient across recent scoring calls.
    pub avg_alpha: f64,
}

// ── Embeddings ─────────────────────────────────────────────────────

/// A unit-norm embedding vector. Wire format is packed little-endian f32
/// (canonical) or a JSON array of numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Wrap and L2-normalize a raw vector. Empty or non-finite input is
    /// rejected by callers via [`Embedding::try_new`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn unit(raw: Vec<f32>) -> Self {
        let norm = raw
            .iter()
            .map(|&x| f64::from(x) * f64::from(x))
            .sum::<f64>()
            .sqrt();
        if norm > 0.0 {
            Self(raw.iter().map(|&x| (f64::from(x) / norm) as f32).collect())
        } else {
            Self(raw)
        }
    }

    /// Validating constructor: non-empty, all components finite.
    pub fn try_new(raw: Vec<f32>) -> Option<Self> {
        if raw.is_empty() || raw.iter().any(|x| !x.is_finite()) {
            return None;
        }
        Some(Self::unit(raw))
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Cosine similarity; 0 when either side has zero norm or dimensions
    /// disagree.
    pub fn cosine(&self, other: &Self) -> f64 {
        cosine(&self.0, other.as_slice())
    }

    /// Canonical packed wire form: little-endian f32s.
    pub fn to_packed(&self) -> Vec<u8> {
        self.0.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    /// Parse the packed wire form. Length must be a multiple of 4.
    pub fn from_packed(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 || bytes.is_empty() {
            return None;
        }
        let raw = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect::<Vec<_>>();
        if raw.iter().any(|x| !x.is_finite()) {
            return None;
        }
        Some(Self(raw))
    }
}

/// Cosine similarity between raw vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut na = 0.0_f64;
    let mut nb = 0.0_f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += f64::from(x) * f64::from(y);
        na += f64::from(x) * f64::from(x);
        nb += f64::from(y) * f64::from(y);
    }
    let norm = (na * nb).sqrt();
    if norm > 0.0 { dot / norm } else { 0.0 }
}

/// Mean-pool a set of embeddings into a raw vector of dimension `dim`;
/// empty input yields the zero vector.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn mean_pool(embeddings: &[Embedding], dim: usize) -> Vec<f32> {
    if embeddings.is_empty() {
        return vec![0.0; dim];
    }
    let count = embeddings.len() as f64;
    let mut acc = vec![0.0_f64; dim];
    for e in embeddings {
        for (a, &x) in acc.iter_mut().zip(e.as_slice()) {
            *a += f64::from(x);
        }
    }
    acc.iter().map(|&x| (x / count) as f32).collect()
}

// ── Tests ──────────────────────────────────────────────────────────
