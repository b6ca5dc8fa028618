//! SHGAT — the multi-head attention scorer over semantic, graph, and
//! historical signals.
//!
//! One forward pass per (intent, candidate): per-head projections of the
//! intent (query) and candidate embedding (key) produce scalar attention
//! logits, softmax-normalized **across heads**; each head's value vector is
//! a projection of the full feature bundle. The weighted concatenation goes
//! through an output projection and a sigmoid, so scores are calibrated to
//! `[0, 1]`. Parameters are kept per hierarchy level so meta-capabilities
//! cannot drown their children.
//!
//! Three hand-tuned signals are applied pre-sigmoid outside the learned
//! projections: a fixed gain on the intent↔candidate cosine, the context
//! boost (configurable coefficient on the candidate↔context cosine), and a
//! fixed +0.5 for spectral cluster co-membership with the context.

#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use std::collections::HashMap;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ShgatSection;
use crate::error::ModelError;
use crate::types::{
    CandidateScore, Embedding, TraceFeatureBundle, TraceStats, cosine,
};

/// Fixed pre-sigmoid boost when the candidate shares a spectral cluster
/// with the context.
pub const CLUSTER_BOOST: f64 = 0.5;

/// Fixed pre-sigmoid gain on the intent↔candidate cosine. Keeps untrained
/// models ranking by semantic affinity; training shapes the rest around it.
pub const SEMANTIC_GAIN: f64 = 2.0;

/// Number of graph-feature scalars in the value input.
const GRAPH_FEATURES: usize = 6;
/// Number of trace-statistic scalars in the value input.
const STAT_FEATURES: usize = 8;

/// Hierarchy level a candidate is scored at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Tool,
    Capability,
    Meta,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Capability => "capability",
            Self::Meta => "meta",
        }
    }
}

impl From<sherpa_graphs::NodeKind> for Level {
    fn from(kind: sherpa_graphs::NodeKind) -> Self {
        match kind {
            sherpa_graphs::NodeKind::Tool => Self::Tool,
            sherpa_graphs::NodeKind::Capability => Self::Capability,
            sherpa_graphs::NodeKind::MetaCapability => Self::Meta,
        }
    }
}

/// One level's parameter set `(Wq, Wk, Wv, Wo, b)`, flattened row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelParams {
    heads: usize,
    hidden: usize,
    /// Embedding dimension (query/key input width).
    embed_dim: usize,
    /// Value input width: `2·embed_dim + graph + stats`.
    value_dim: usize,
    /// `[heads · hidden · embed_dim]`
    wq: Vec<f64>,
    /// `[heads · hidden · embed_dim]`
    wk: Vec<f64>,
    /// `[heads · hidden · value_dim]`
    wv: Vec<f64>,
    /// `[heads · hidden]`
    wo: Vec<f64>,
    b: f64,
}

impl LevelParams {
    fn init(heads: usize, hidden: usize, embed_dim: usize, seed: u64) -> Self {
        let value_dim = 2 * embed_dim + GRAPH_FEATURES + STAT_FEATURES;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut init = |rows: usize, cols: usize| -> Vec<f64> {
            let scale = (6.0 / (rows + cols) as f64).sqrt();
            (0..rows * cols).map(|_| rng.gen_range(-scale..scale)).collect()
        };
        Self {
            heads,
            hidden,
            embed_dim,
            value_dim,
            wq: init(heads * hidden, embed_dim),
            wk: init(heads * hidden, embed_dim),
            wv: init(heads * hidden, value_dim),
            wo: init(1, heads * hidden),
            b: 0.0,
        }
    }
}

/// A labelled training example: features for one candidate plus the
/// observed outcome.
#[derive(Debug, Clone)]
pub struct TrainExample {
    pub intent: Embedding,
    pub bundle: TraceFeatureBundle,
    pub level: Level,
    pub outcome: bool,
}

/// Training report for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub loss: f64,
    pub accuracy: f64,
}

/// Intermediate activations kept for backpropagation.
struct Forward {
    q: Vec<f64>,
    k: Vec<f64>,
    v: Vec<f64>,
    alpha: Vec<f64>,
    weighted: Vec<f64>,
    score: f64,
}

/// The attention model: per-level parameters plus a registry of scorable
/// nodes. Training and scoring on one instance must be serialized by the
/// caller (the engine holds it behind a lock).
#[derive(Debug)]
pub struct ShgatModel {
    config: ShgatSection,
    embedding_dim: usize,
    params: HashMap<Level, LevelParams>,
    registry: HashMap<String, (Level, Embedding)>,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl ShgatModel {
    pub fn new(config: ShgatSection, embedding_dim: usize) -> Self {
        let mut params = HashMap::new();
        for (i, level) in [Level::Tool, Level::Capability, Level::Meta]
            .into_iter()
            .enumerate()
        {
            params.insert(
                level,
                LevelParams::init(
                    config.num_heads,
                    config.hidden_dim,
                    embedding_dim,
                    0x5EED + i as u64,
                ),
            );
        }
        Self {
            config,
            embedding_dim,
            params,
            registry: HashMap::new(),
        }
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Make a node scorable. Later registrations replace earlier ones.
    pub fn register_node(&mut self, id: impl Into<String>, level: Level, embedding: Embedding) {
        self.registry.insert(id.into(), (level, embedding));
    }

    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }

    /// Cold start: nothing registered yet, every prediction is neutral.
    pub fn is_cold(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn level_of(&self, id: &str) -> Option<Level> {
        self.registry.get(id).map(|(level, _)| *level)
    }

    pub fn embedding_of(&self, id: &str) -> Option<&Embedding> {
        self.registry.get(id).map(|(_, e)| e)
    }

    /// Ids of registered nodes at a level.
    pub fn registered_at(&self, level: Level) -> Vec<String> {
        let mut ids: Vec<String> = self
            .registry
            .iter()
            .filter(|(_, (l, _))| *l == level)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    // ── Forward pass ───────────────────────────────────────────────

    /// Assemble the value-projection input from the bundle.
    fn value_input(&self, bundle: &TraceFeatureBundle) -> Vec<f64> {
        let dim = self.embedding_dim;
        let mut x = Vec::with_capacity(2 * dim + GRAPH_FEATURES + STAT_FEATURES);
        let cand = bundle.candidate_embedding.as_slice();
        x.extend((0..dim).map(|i| cand.get(i).copied().map_or(0.0, f64::from)));
        let g = &bundle.graph;
        x.extend([
            g.pagerank,
            f64::from(u8::from(g.cluster_co_membership)),
            g.co_occurrence,
            g.adamic_adar,
            g.heat_diffusion,
            f64::from(u8::from(g.cluster_id.is_some())),
        ]);
        x.extend(bundle.stats.as_vec());
        x.extend(
            (0..dim).map(|i| bundle.context_mean.get(i).copied().map_or(0.0, f64::from)),
        );
        x
    }

    fn forward(
        &self,
        params: &LevelParams,
        intent: &Embedding,
        bundle: &TraceFeatureBundle,
    ) -> Forward {
        let heads = params.heads;
        let hidden = params.hidden;
        let dim = params.embed_dim;
        let x_int: Vec<f64> = (0..dim)
            .map(|i| intent.as_slice().get(i).copied().map_or(0.0, f64::from))
            .collect();
        let x_cand: Vec<f64> = (0..dim)
            .map(|i| {
                bundle
                    .candidate_embedding
                    .as_slice()
                    .get(i)
                    .copied()
                    .map_or(0.0, f64::from)
            })
            .collect();
        let x_val = self.value_input(bundle);

        let matvec = |w: &[f64], x: &[f64], rows: usize, cols: usize| -> Vec<f64> {
            (0..rows)
                .map(|r| {
                    let row = &w[r * cols..(r + 1) * cols];
                    row.iter().zip(x.iter()).map(|(a, b)| a * b).sum()
                })
                .collect()
        };

        let q = matvec(&params.wq, &x_int, heads * hidden, dim);
        let k = matvec(&params.wk, &x_cand, heads * hidden, dim);
        let v = matvec(&params.wv, &x_val, heads * hidden, params.value_dim);

        // Scalar attention logit per head: (q_h · k_h) / √hidden.
        let scale = (hidden as f64).sqrt();
        let logits: Vec<f64> = (0..heads)
            .map(|h| {
                let qs = &q[h * hidden..(h + 1) * hidden];
                let ks = &k[h * hidden..(h + 1) * hidden];
                qs.iter().zip(ks.iter()).map(|(a, b)| a * b).sum::<f64>() / scale
            })
            .collect();

        // Softmax across heads.
        let max_logit = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|&l| (l - max_logit).exp()).collect();
        let denom: f64 = exps.iter().sum();
        let alpha: Vec<f64> = exps.iter().map(|&e| e / denom).collect();

        // Weighted value concatenation.
        let weighted: Vec<f64> = (0..heads * hidden)
            .map(|i| alpha[i / hidden] * v[i])
            .collect();

        let mut z = params
            .wo
            .iter()
            .zip(weighted.iter())
            .map(|(a, b)| a * b)
            .sum::<f64>()
            + params.b;

        // Hand-tuned signals outside the learned projections.
        z += SEMANTIC_GAIN * cosine(intent.as_slice(), bundle.candidate_embedding.as_slice());
        if bundle.has_context {
            let ctx_sim = cosine(
                bundle.candidate_embedding.as_slice(),
                &bundle.context_mean,
            );
            z += self.config.context_boost * ctx_sim;
        }
        if bundle.graph.cluster_co_membership {
            z += CLUSTER_BOOST;
        }

        let score = sigmoid(z);
        Forward {
            q,
            k,
            v,
            alpha,
            weighted,
            score,
        }
    }

    /// Score one candidate bundle. Pure with respect to model state.
    pub fn score_bundle(
        &self,
        intent: &Embedding,
        bundle: &TraceFeatureBundle,
        level: Level,
    ) -> CandidateScore {
        let params = &self.params[&level];
        let fwd = self.forward(params, intent, bundle);
        CandidateScore {
            id: bundle.candidate_id.clone(),
            score: fwd.score as f32,
            head_weights: fwd.alpha.iter().map(|&a| a as f32).collect(),
        }
    }

    /// Score a batch of bundles in parallel, descending by score.
    pub fn score_all(
        &self,
        intent: &Embedding,
        bundles: &[(TraceFeatureBundle, Level)],
    ) -> Vec<CandidateScore> {
        let mut scores: Vec<CandidateScore> = bundles
            .par_iter()
            .map(|(bundle, level)| self.score_bundle(intent, bundle, *level))
            .collect();
        scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scores
    }

    /// Predicted success probability of an executed path: uniform-weight
    /// mean of per-node scores. Cold start (no registered node on the
    /// path, or an empty model) returns the neutral 0.5.
    pub fn predict_path_success(&self, intent: &Embedding, path: &[String]) -> f64 {
        if self.is_cold() {
            return 0.5;
        }
        let scores: Vec<f64> = path
            .iter()
            .filter_map(|id| {
                let (level, embedding) = self.registry.get(id)?;
                let bundle = TraceFeatureBundle {
                    candidate_id: id.clone(),
                    candidate_embedding: embedding.clone(),
                    context_mean: vec![0.0; self.embedding_dim],
                    has_context: false,
                    stats: TraceStats::default(),
                    graph: crate::types::GraphFeatures::default(),
                };
                Some(f64::from(self.score_bundle(intent, &bundle, *level).score))
            })
            .collect();
        if scores.is_empty() {
            return 0.5;
        }
        scores.iter().sum::<f64>() / scores.len() as f64
    }

    // ── Training ───────────────────────────────────────────────────

    /// One SGD pass (log-loss) over the batch, repeated for the configured
    /// epoch count. Weight updates land atomically per call; the caller
    /// serializes training against scoring.
    pub fn train_batch(&mut self, examples: &[TrainExample]) -> Result<TrainReport, ModelError> {
        if examples.is_empty() {
            return Err(ModelError::EmptyBatch);
        }
        for example in examples {
            if example.intent.dim() != self.embedding_dim {
                return Err(ModelError::DimensionMismatch {
                    expected: self.embedding_dim,
                    got: example.intent.dim(),
                });
            }
        }

        let lr = self.config.learning_rate;
        let mut last_loss = 0.0;
        let mut correct = 0usize;

        for epoch in 0..self.config.epochs_per_batch {
            let mut epoch_loss = 0.0;
            correct = 0;
            for example in examples {
                let y = if example.outcome { 1.0 } else { 0.0 };
                let (loss, hit) = self.train_example(example, y, lr);
                epoch_loss += loss;
                if hit {
                    correct += 1;
                }
            }
            last_loss = epoch_loss / examples.len() as f64;
            debug!(epoch, loss = last_loss, "SHGAT epoch");
        }

        let report = TrainReport {
            loss: last_loss,
            accuracy: correct as f64 / examples.len() as f64,
        };
        info!(
            examples = examples.len(),
            loss = report.loss,
            accuracy = report.accuracy,
            "SHGAT batch trained"
        );
        Ok(report)
    }

    fn train_example(&mut self, example: &TrainExample, y: f64, lr: f64) -> (f64, bool) {
        let x_val = self.value_input(&example.bundle);
        let params = self.params.get(&example.level).expect("level params");
        let fwd = self.forward(params, &example.intent, &example.bundle);

        let p = fwd.score.clamp(1e-7, 1.0 - 1e-7);
        let loss = -(y * p.ln() + (1.0 - y) * (1.0 - p).ln());
        let hit = (p >= 0.5) == (y >= 0.5);

        let heads = params.heads;
        let hidden = params.hidden;
        let dim = params.embed_dim;
        let scale = (hidden as f64).sqrt();

        // dL/dz for sigmoid + log-loss.
        let dz = p - y;

        // Output projection gradients.
        let grad_wo: Vec<f64> = fwd.weighted.iter().map(|&u| dz * u).collect();
        let grad_b = dz;

        // Back through the weighted concatenation.
        let wo = params.wo.clone();
        let grad_weighted: Vec<f64> = wo.iter().map(|&w| dz * w).collect();

        // Per-head value and attention gradients.
        let mut grad_v = vec![0.0; heads * hidden];
        let mut grad_alpha = vec![0.0; heads];
        for h in 0..heads {
            for j in 0..hidden {
                let i = h * hidden + j;
                grad_v[i] = grad_weighted[i] * fwd.alpha[h];
                grad_alpha[h] += grad_weighted[i] * fwd.v[i];
            }
        }

        // Softmax backward (across heads).
        let dot: f64 = fwd
            .alpha
            .iter()
            .zip(grad_alpha.iter())
            .map(|(a, g)| a * g)
            .sum();
        let grad_logits: Vec<f64> = (0..heads)
            .map(|h| fwd.alpha[h] * (grad_alpha[h] - dot))
            .collect();

        // Attention logit backward: s_h = (q_h · k_h)/√hidden.
        let mut grad_q = vec![0.0; heads * hidden];
        let mut grad_k = vec![0.0; heads * hidden];
        for h in 0..heads {
            for j in 0..hidden {
                let i = h * hidden + j;
                grad_q[i] = grad_logits[h] * fwd.k[i] / scale;
                grad_k[i] = grad_logits[h] * fwd.q[i] / scale;
            }
        }

        let x_int: Vec<f64> = (0..dim)
            .map(|i| {
                example
                    .intent
                    .as_slice()
                    .get(i)
                    .copied()
                    .map_or(0.0, f64::from)
            })
            .collect();
        let x_cand: Vec<f64> = (0..dim)
            .map(|i| {
                example
                    .bundle
                    .candidate_embedding
                    .as_slice()
                    .get(i)
                    .copied()
                    .map_or(0.0, f64::from)
            })
            .collect();

        // Apply updates.
        let params = self.params.get_mut(&example.level).expect("level params");
        for (w, g) in params.wo.iter_mut().zip(grad_wo.iter()) {
            *w -= lr * g;
        }
        params.b -= lr * grad_b;
        for r in 0..heads * hidden {
            for (c, &xi) in x_int.iter().enumerate() {
                params.wq[r * dim + c] -= lr * grad_q[r] * xi;
            }
            for (c, &xc) in x_cand.iter().enumerate() {
                params.wk[r * dim + c] -= lr * grad_k[r] * xc;
            }
            let vrow = &mut params.wv[r * params.value_dim..(r + 1) * params.value_dim];
            for (c, &xv) in x_val.iter().enumerate() {
                vrow[c] -= lr * grad_v[r] * xv;
            }
        }

        (loss, hit)
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Serialize one level's parameters.
    pub fn params_blob(&self, level: Level) -> Result<Vec<u8>, ModelError> {
        serde_json::to_vec(&self.params[&level])
            .map_err(|e| ModelError::CorruptParams(e.to_string()))
    }

    /// Restore one level's parameters from a blob.
    pub fn load_params_blob(&mut self, level: Level, blob: &[u8]) -> Result<(), ModelError> {
        let params: LevelParams = serde_json::from_slice(blob)
            .map_err(|e| ModelError::CorruptParams(e.to_string()))?;
        if params.embed_dim != self.embedding_dim
            || params.heads != self.config.num_heads
            || params.hidden != self.config.hidden_dim
        {
            return Err(ModelError::DimensionMismatch {
                expected: self.embedding_dim,
                got: params.embed_dim,
            });
        }
        self.params.insert(level, params);
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────
