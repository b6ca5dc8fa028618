//! Per-tool trace statistics with a TTL + LRU cache, and assembly of the
//! feature bundle the attention scorer consumes.
//!
//! Statistics are recomputed from the trace log on cache miss; tools with
//! fewer than `min_samples` traces get the neutral defaults. The
//! intent-similarity rate depends on the query's intent embedding, so it is
//! computed per call rather than cached.

#![allow(clippy::cast_precision_loss)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::debug;

use crate::config::StatsSection;
use crate::store::SherpaStore;
use crate::types::{
    DEFAULT_TRACE_STATS, Embedding, ExecutionTrace, GraphFeatures, TraceFeatureBundle,
    TraceStats, mean_pool,
};

#[derive(Debug)]
struct CachedStats {
    stats: TraceStats,
    computed_at: Instant,
    last_used: u64,
}

#[derive(Debug, Default)]
struct StatsCacheInner {
    entries: HashMap<String, CachedStats>,
    clock: u64,
    hits: u64,
    misses: u64,
}

/// Trace-statistics extractor (feature source for the scorer).
#[derive(Debug)]
pub struct FeatureExtractor {
    store: Arc<dyn SherpaStore>,
    config: StatsSection,
    cache: Mutex<StatsCacheInner>,
}

impl FeatureExtractor {
    pub fn new(store: Arc<dyn SherpaStore>, config: StatsSection) -> Self {
        Self {
            store,
            config,
            cache: Mutex::new(StatsCacheInner::default()),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_millis(self.config.cache_ttl_ms)
    }

    fn cache_lookup(&self, tool_id: &str) -> Option<TraceStats> {
        let mut cache = self.cache.lock().unwrap();
        cache.clock += 1;
        let clock = cache.clock;
        let ttl = self.ttl();
        if let Some(entry) = cache.entries.get_mut(tool_id) {
            if entry.computed_at.elapsed() < ttl {
                entry.last_used = clock;
                let stats = entry.stats;
                cache.hits += 1;
                return Some(stats);
            }
            cache.entries.remove(tool_id);
        }
        cache.misses += 1;
        None
    }

    fn cache_insert(&self, tool_id: &str, stats: TraceStats) {
        let mut cache = self.cache.lock().unwrap();
        cache.clock += 1;
        let clock = cache.clock;
        cache.entries.insert(
            tool_id.to_string(),
            CachedStats {
                stats,
                computed_at: Instant::now(),
                last_used: clock,
            },
        );
        if cache.entries.len() > self.config.max_cache_entries {
            if let Some(oldest) = cache
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                cache.entries.remove(&oldest);
            }
        }
    }

    /// Drop the cache entry for a tool (called by the learning loop after
    /// every execution that touches it).
    pub fn invalidate(&self, tool_id: &str) {
        self.cache.lock().unwrap().entries.remove(tool_id);
    }

    /// Fraction of `stats` lookups served from cache.
    pub fn hit_rate(&self) -> f64 {
        let cache = self.cache.lock().unwrap();
        let total = cache.hits + cache.misses;
        if total == 0 {
            0.0
        } else {
            cache.hits as f64 / total as f64
        }
    }

    /// Statistics for one tool; cached with the configured TTL.
    pub async fn stats(&self, tool_id: &str) -> crate::error::Result<TraceStats> {
        if let Some(cached) = self.cache_lookup(tool_id) {
            return Ok(cached);
        }
        let usage = self.store.usage_counts().await?;
        let stats = self.compute_stats(tool_id, &usage).await?;
        self.cache_insert(tool_id, stats);
        Ok(stats)
    }

    /// Statistics for many tools with a single usage-count pass. Populates
    /// the cache.
    pub async fn batch_stats(
        &self,
        tool_ids: &[String],
    ) -> crate::error::Result<HashMap<String, TraceStats>> {
        let usage = self.store.usage_counts().await?;
        let mut out = HashMap::with_capacity(tool_ids.len());
        for tool_id in tool_ids {
            let stats = if let Some(cached) = self.cache_lookup(tool_id) {
                cached
            } else {
                let stats = self.compute_stats(tool_id, &usage).await?;
                self.cache_insert(tool_id, stats);
                stats
            };
            out.insert(tool_id.clone(), stats);
        }
        Ok(out)
    }

    async fn compute_stats(
        &self,
        tool_id: &str,
        usage: &HashMap<String, u64>,
    ) -> crate::error::Result<TraceStats> {
        let traces = self.store.traces_mentioning(tool_id).await?;
        if traces.len() < self.config.min_samples {
            debug!(
                tool = tool_id,
                samples = traces.len(),
                "Below minimum sample size, using default stats"
            );
            return Ok(DEFAULT_TRACE_STATS);
        }

        let total = traces.len() as f64;
        let successes = traces.iter().filter(|t| t.success).count() as f64;

        // Contextual: restricted to runs where the tool executed as part of
        // a longer path (i.e. with surrounding context).
        let contextual: Vec<&ExecutionTrace> = traces
            .iter()
            .filter(|t| t.executed_path.len() > 1 && t.executed_path.iter().any(|n| n == tool_id))
            .collect();
        let contextual_rate = if contextual.is_empty() {
            DEFAULT_TRACE_STATS.contextual_success_rate
        } else {
            contextual.iter().filter(|t| t.success).count() as f64 / contextual.len() as f64
        };

        // Recency: exponential half-life decay on the most recent run.
        let recency = traces
            .iter()
            .map(|t| t.finished_at)
            .max()
            .map_or(0.0, |latest| {
                let hours = (Utc::now() - latest).num_milliseconds() as f64 / 3_600_000.0;
                (-hours.max(0.0) * std::f64::consts::LN_2 / self.config.recency_half_life_h)
                    .exp()
            });

        let max_usage = usage.values().copied().max().unwrap_or(0);
        let usage_frequency = if max_usage == 0 {
            0.0
        } else {
            usage.get(tool_id).copied().unwrap_or(0) as f64 / max_usage as f64
        };

        // Normalized position across occurrences; length-1 paths carry no
        // ordering signal and are ignored.
        let mut positions = Vec::new();
        let mut steps_to_end = Vec::new();
        for trace in &traces {
            let len = trace.executed_path.len();
            for (idx, node) in trace.executed_path.iter().enumerate() {
                if node != tool_id {
                    continue;
                }
                if len > 1 {
                    positions.push(idx as f64 / (len - 1) as f64);
                }
                if trace.success {
                    steps_to_end.push((len - 1 - idx) as f64);
                }
            }
        }
        let sequence_position = if positions.is_empty() {
            DEFAULT_TRACE_STATS.sequence_position
        } else {
            positions.iter().sum::<f64>() / positions.len() as f64
        };
        let (avg_path_len, path_variance) = if steps_to_end.is_empty() {
            (0.0, 0.0)
        } else {
            let mean = steps_to_end.iter().sum::<f64>() / steps_to_end.len() as f64;
            let variance = steps_to_end
                .iter()
                .map(|s| (s - mean).powi(2))
                .sum::<f64>()
                / steps_to_end.len() as f64;
            (mean.round(), variance)
        };

        Ok(TraceStats {
            historical_success_rate: successes / total,
            contextual_success_rate: contextual_rate,
            intent_similar_success_rate: DEFAULT_TRACE_STATS.intent_similar_success_rate,
            recency_score: recency,
            usage_frequency,
            sequence_position,
            path_variance,
            avg_path_length_to_success: avg_path_len,
        })
    }

    /// Success rate over traces whose intent embedding has cosine ≥
    /// threshold with the query intent. `None` when no trace qualifies.
    pub async fn intent_similar_success_rate(
        &self,
        tool_id: &str,
        intent: &Embedding,
    ) -> crate::error::Result<Option<f64>> {
        let traces = self.store.traces_mentioning(tool_id).await?;
        let similar: Vec<&ExecutionTrace> = traces
            .iter()
            .filter(|t| {
                t.intent_embedding
                    .as_ref()
                    .is_some_and(|e| e.cosine(intent) >= self.config.intent_similarity_threshold)
            })
            .collect();
        if similar.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            similar.iter().filter(|t| t.success).count() as f64 / similar.len() as f64,
        ))
    }

    /// Assemble the full feature bundle for one candidate. Context
    /// embeddings are mean-pooled (zero vector when empty); graph features
    /// arrive from the hypergraph service, already version-tagged.
    pub async fn extract(
        &self,
        intent: &Embedding,
        candidate_id: &str,
        candidate_embedding: Embedding,
        context_embeddings: &[Embedding],
        graph: GraphFeatures,
    ) -> crate::error::Result<TraceFeatureBundle> {
        let mut stats = self.stats(candidate_id).await?;
        if let Some(rate) = self
            .intent_similar_success_rate(candidate_id, intent)
            .await?
        {
            stats.intent_similar_success_rate = rate;
        }
        let dim = candidate_embedding.dim();
        Ok(TraceFeatureBundle {
            candidate_id: candidate_id.to_string(),
            candidate_embedding,
            context_mean: mean_pool(context_embeddings, dim),
            has_context: !context_embeddings.is_empty(),
            stats,
            graph,
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;
    use crate::types::{TraceInput, TraceKind};
    use chrono::Duration as ChronoDuration;

    fn input(path: &[&str], success: bool, intent: Option<Embedding>) -> TraceInput {
        let start = Utc::now() - ChronoDuration::minutes(5);
        TraceInput {
            parent_trace_id: None,
            kind: TraceKind::CapabilityRun,
            node_id: "cap".into(),
            started_at: start,
            finished_at: start + ChronoDuration::seconds(2),
            success,
            executed_path: path.iter().map(ToString::to_string).collect(),
            intent_text: None,
            intent_embedding: intent,
            priority: None,
            user_id: None,
            agent_id: None,
            decisions: vec![],
            task_results: vec![],
        }
    }

    async fn extractor_with_traces(
        traces: Vec<TraceInput>,
        min_samples: usize,
    ) -> FeatureExtractor {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        for t in traces {
            store.save_trace(t).await.unwrap();
        }
        FeatureExtractor::new(
            store,
            StatsSection {
                min_samples,
                ..StatsSection::default()
            },
        )
    }

    #[tokio::test]
    async fn below_min_samples_returns_defaults() {
        let extractor =
            extractor_with_traces(vec![input(&["a", "b"], true, None)], 5).await;
        let stats = extractor.stats("a").await.unwrap();
        assert_eq!(stats, DEFAULT_TRACE_STATS);
    }

    #[tokio::test]
    async fn success_rate_and_position() {
        // Tool "mid" sits in the middle of 3-step paths: 3 successes, 1 failure.
        let traces = vec![
            input(&["start", "mid", "end"], true, None),
            input(&["start", "mid", "end"], true, None),
            input(&["start", "mid", "end"], true, None),
            input(&["start", "mid", "end"], false, None),
        ];
        let extractor = extractor_with_traces(traces, 2).await;
        let stats = extractor.stats("mid").await.unwrap();

        assert!((stats.historical_success_rate - 0.75).abs() < 1e-9);
        assert!((stats.sequence_position - 0.5).abs() < 1e-9);
        // One step from the end, in every successful path.
        assert!((stats.avg_path_length_to_success - 1.0).abs() < 1e-9);
        assert!(stats.path_variance.abs() < 1e-9);
        assert!(stats.recency_score > 0.9, "recent traces decay little");
    }

    #[tokio::test]
    async fn usage_frequency_normalized_by_max() {
        let traces = vec![
            input(&["hot", "cold"], true, None),
            input(&["hot"], true, None),
            input(&["hot"], true, None),
            input(&["hot"], true, None),
        ];
        let extractor = extractor_with_traces(traces, 1).await;
        let hot = extractor.stats("hot").await.unwrap();
        let cold = extractor.stats("cold").await.unwrap();
        assert!((hot.usage_frequency - 1.0).abs() < 1e-9);
        assert!((cold.usage_frequency - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn intent_similar_filters_by_cosine() {
        let near = Embedding::try_new(vec![1.0, 0.05]);
        let far = Embedding::try_new(vec![0.0, 1.0]);
        let traces = vec![
            input(&["t"], true, near.clone()),
            input(&["t"], false, far),
        ];
        let extractor = extractor_with_traces(traces, 1).await;

        let intent = Embedding::try_new(vec![1.0, 0.0]).unwrap();
        let rate = extractor
            .intent_similar_success_rate("t", &intent)
            .await
            .unwrap();
        // Only the near trace qualifies, and it succeeded.
        assert_eq!(rate, Some(1.0));

        let orthogonal_intent = Embedding::try_new(vec![0.5, -0.5]).unwrap();
        let rate = extractor
            .intent_similar_success_rate("t", &orthogonal_intent)
            .await
            .unwrap();
        assert_eq!(rate, None);
    }

    #[tokio::test]
    async fn cache_hits_and_invalidation() {
        let extractor = extractor_with_traces(
            vec![
                input(&["a", "b"], true, None),
                input(&["a", "b"], true, None),
            ],
            1,
        )
        .await;

        extractor.stats("a").await.unwrap();
        assert!((extractor.hit_rate() - 0.0).abs() < 1e-9);
        extractor.stats("a").await.unwrap();
        assert!((extractor.hit_rate() - 0.5).abs() < 1e-9);

        extractor.invalidate("a");
        extractor.stats("a").await.unwrap();
        // 1 hit over 3 lookups.
        assert!((extractor.hit_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn extract_pools_context() {
        let extractor = extractor_with_traces(vec![], 5).await;
        let intent = Embedding::try_new(vec![1.0, 0.0]).unwrap();
        let candidate = Embedding::try_new(vec![0.0, 1.0]).unwrap();

        let bundle = extractor
            .extract(&intent, "cap", candidate.clone(), &[], GraphFeatures::default())
            .await
            .unwrap();
        assert!(!bundle.has_context);
        assert_eq!(bundle.context_mean, vec![0.0, 0.0]);

        let ctx = [
            Embedding::try_new(vec![1.0, 0.0]).unwrap(),
            Embedding::try_new(vec![0.0, 1.0]).unwrap(),
        ];
        let bundle = extractor
            .extract(&intent, "cap", candidate, &ctx, GraphFeatures::default())
            .await
            .unwrap();
        assert!(bundle.has_context);
        assert!((bundle.context_mean[0] - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn batch_stats_covers_all_tools() {
        let extractor = extractor_with_traces(
            vec![
                input(&["a", "b"], true, None),
                input(&["a", "b"], false, None),
            ],
            1,
        )
        .await;
        let stats = extractor
            .batch_stats(&["a".to_string(), "b".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(stats.len(), 3);
        assert!((stats["a"].historical_success_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats["ghost"], DEFAULT_TRACE_STATS);
    }
}
