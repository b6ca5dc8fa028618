//! Prioritized experience replay over the trace log.
//!
//! Sampling probability is `priority^α`, without replacement. Two cold-start
//! escapes fall back to uniform sampling: `α = 0`, and a pool whose priority
//! variance sits below the configured floor (fresh engines store everything
//! at the neutral 0.5, where weighted sampling would just be noisy uniform).

use rand::Rng;
use rand::seq::SliceRandom;

use crate::config::PerSection;
use crate::error::Result;
use crate::store::SherpaStore;
use crate::types::{ExecutionTrace, TraceId};

/// Replay priority bounds and the cold-start default.
pub const MIN_PRIORITY: f64 = 0.01;
pub const MAX_PRIORITY: f64 = 1.0;
pub const COLD_START_PRIORITY: f64 = 0.5;

/// TD-error priority for a finished trace: `clamp(|actual − predicted|)`.
/// `predicted` is `None` when the model has nothing registered yet (cold
/// start), which yields the neutral priority.
pub fn td_error_priority(predicted: Option<f64>, success: bool) -> f64 {
    let Some(predicted) = predicted else {
        return COLD_START_PRIORITY;
    };
    let actual = if success { 1.0 } else { 0.0 };
    (actual - predicted).abs().clamp(MIN_PRIORITY, MAX_PRIORITY)
}

/// Population variance of the pool's priorities.
fn priority_variance(pool: &[(TraceId, f64)]) -> f64 {
    if pool.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = pool.len() as f64;
    let mean = pool.iter().map(|(_, p)| p).sum::<f64>() / n;
    pool.iter().map(|(_, p)| (p - mean).powi(2)).sum::<f64>() / n
}

/// Draw up to `limit` distinct trace ids from the pool with probability
/// ∝ `priority^α`, without replacement.
pub fn sample_ids<R: Rng>(
    pool: &[(TraceId, f64)],
    limit: usize,
    config: &PerSection,
    rng: &mut R,
) -> Vec<TraceId> {
    let limit = limit.min(pool.len());
    if limit == 0 {
        return Vec::new();
    }

    let uniform = config.alpha == 0.0
        || priority_variance(pool) < config.cold_start_variance_floor;

    if uniform {
        let mut ids: Vec<TraceId> = pool.iter().map(|(id, _)| *id).collect();
        ids.shuffle(rng);
        ids.truncate(limit);
        return ids;
    }

    let mut candidates: Vec<(TraceId, f64)> = pool
        .iter()
        .map(|(id, p)| (*id, p.max(MIN_PRIORITY).powf(config.alpha)))
        .collect();

    let mut chosen = Vec::with_capacity(limit);
    for _ in 0..limit {
        let total: f64 = candidates.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            break;
        }
        let mut ticket = rng.gen_range(0.0..total);
        let mut pick = candidates.len() - 1;
        for (i, (_, w)) in candidates.iter().enumerate() {
            ticket -= w;
            if ticket <= 0.0 {
                pick = i;
                break;
            }
        }
        chosen.push(candidates.swap_remove(pick).0);
    }
    chosen
}

/// Sample full traces from the store: pool = traces with
/// `priority ≥ min_priority`.
pub async fn sample_by_priority(
    store: &dyn SherpaStore,
    config: &PerSection,
    limit: usize,
    min_priority: f64,
) -> Result<Vec<ExecutionTrace>> {
    let pool = store.trace_priorities(min_priority).await?;
    let ids = sample_ids(&pool, limit, config, &mut rand::thread_rng());
    store.traces_by_ids(&ids).await
}

// ── Tests ──────────────────────────────────────────────────────────
