use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level Sherpa configuration, matching `.sherpa/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SherpaConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub shgat: ShgatSection,
    #[serde(default)]
    pub drdsp: DrdspSection,
    #[serde(default)]
    pub edge: EdgeSection,
    #[serde(default)]
    pub per: PerSection,
    #[serde(default)]
    pub stats: StatsSection,
    #[serde(default)]
    pub predict: PredictSection,
    #[serde(default)]
    pub embedder: EmbedderSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Width of all embeddings.
    pub embedding_dim: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            embedding_dim: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShgatSection {
    /// Attention heads (2–8).
    pub num_heads: usize,
    /// Hidden projection width (8–128).
    pub hidden_dim: usize,
    pub learning_rate: f64,
    pub epochs_per_batch: u32,
    /// Coefficient on the candidate↔context cosine boost.
    pub context_boost: f64,
}

impl Default for ShgatSection {
    fn default() -> Self {
        Self {
            num_heads: 2,
            hidden_dim: 32,
            learning_rate: 0.01,
            epochs_per_batch: 10,
            context_boost: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrdspSection {
    /// Denominator clamp for `1/weight`.
    pub cost_floor: f64,
}

impl Default for DrdspSection {
    fn default() -> Self {
        Self { cost_floor: 0.1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSection {
    /// Observation count that promotes provenance to `observed`.
    pub observed_threshold: u32,
}

impl Default for EdgeSection {
    fn default() -> Self {
        Self {
            observed_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerSection {
    /// Priority exponent; 0 means uniform sampling.
    pub alpha: f64,
    pub min_priority: f64,
    pub max_priority: f64,
    /// Below this priority variance the sampler falls back to uniform.
    pub cold_start_variance_floor: f64,
}

impl Default for PerSection {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            min_priority: 0.01,
            max_priority: 1.0,
            cold_start_variance_floor: 0.001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSection {
    pub cache_ttl_ms: u64,
    /// Below this many traces a tool gets the neutral default stats.
    pub min_samples: usize,
    pub recency_half_life_h: f64,
    pub max_cache_entries: usize,
    /// Cosine threshold for intent-similar success.
    pub intent_similarity_threshold: f64,
}

impl Default for StatsSection {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 300_000,
            min_samples: 5,
            recency_half_life_h: 24.0,
            max_cache_entries: 1000,
            intent_similarity_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictSection {
    /// Candidates scoring below this are discarded.
    pub thompson_threshold: f32,
    pub max_confidence: f32,
}

impl Default for PredictSection {
    fn default() -> Self {
        Self {
            thompson_threshold: 0.4,
            max_confidence: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderSection {
    /// `"http"` or `"hash"` (deterministic, offline).
    pub provider: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Base URL override (for custom providers).
    pub base_url: Option<String>,
    /// Transient failures are retried up to this many times.
    pub max_retries: u32,
    /// LRU capacity of the text → embedding cache.
    pub cache_entries: usize,
}

impl Default for EmbedderSection {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            model: "text-embed-v2".to_string(),
            api_key_env: "SHERPA_EMBED_API_KEY".to_string(),
            base_url: None,
            max_retries: 3,
            cache_entries: 2048,
        }
    }
}

impl SherpaConfig {
    /// Parse a TOML document and validate ranges.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.embedding_dim == 0 {
            return Err(ConfigError::Invalid("embedding_dim must be positive".into()));
        }
        if !(2..=8).contains(&self.shgat.num_heads) {
            return Err(ConfigError::Invalid(format!(
                "shgat.num_heads must be in 2..=8, got {}",
                self.shgat.num_heads
            )));
        }
        if !(8..=128).contains(&self.shgat.hidden_dim) {
            return Err(ConfigError::Invalid(format!(
                "shgat.hidden_dim must be in 8..=128, got {}",
                self.shgat.hidden_dim
            )));
        }
        if self.shgat.learning_rate <= 0.0 || !self.shgat.learning_rate.is_finite() {
            return Err(ConfigError::Invalid("shgat.learning_rate must be positive".into()));
        }
        if self.drdsp.cost_floor <= 0.0 {
            return Err(ConfigError::Invalid("drdsp.cost_floor must be positive".into()));
        }
        if self.per.alpha < 0.0 {
            return Err(ConfigError::Invalid("per.alpha must be non-negative".into()));
        }
        if self.per.min_priority <= 0.0 || self.per.min_priority > self.per.max_priority {
            return Err(ConfigError::Invalid(
                "per priority bounds must satisfy 0 < min ≤ max".into(),
            ));
        }
        if self.predict.max_confidence <= 0.0 || self.predict.max_confidence > 1.0 {
            return Err(ConfigError::Invalid(
                "predict.max_confidence must be in (0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SherpaConfig::default().validate().unwrap();
    }

    #[test]
    fn default_values_match_contract() {
        let c = SherpaConfig::default();
        assert_eq!(c.engine.embedding_dim, 1024);
        assert_eq!(c.shgat.num_heads, 2);
        assert!((c.shgat.learning_rate - 0.01).abs() < f64::EPSILON);
        assert!((c.shgat.context_boost - 0.3).abs() < f64::EPSILON);
        assert!((c.drdsp.cost_floor - 0.1).abs() < f64::EPSILON);
        assert_eq!(c.edge.observed_threshold, 3);
        assert!((c.per.alpha - 0.6).abs() < f64::EPSILON);
        assert!((c.per.min_priority - 0.01).abs() < f64::EPSILON);
        assert_eq!(c.stats.cache_ttl_ms, 300_000);
        assert_eq!(c.stats.min_samples, 5);
        assert!((c.stats.recency_half_life_h - 24.0).abs() < f64::EPSILON);
        assert_eq!(c.stats.max_cache_entries, 1000);
        assert!((c.predict.thompson_threshold - 0.4).abs() < f32::EPSILON);
        assert!((c.predict.max_confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = SherpaConfig::from_toml(
            r#"
            [shgat]
            num_heads = 2
            hidden_dim = 16
            learning_rate = 0.05
            epochs_per_batch = 5
            context_boost = 0.3
            "#,
        )
        .unwrap();
        assert_eq!(config.shgat.num_heads, 2);
        assert_eq!(config.engine.embedding_dim, 1024);
    }

    #[test]
    fn out_of_range_heads_rejected() {
        let mut config = SherpaConfig::default();
        config.shgat.num_heads = 1;
        assert!(config.validate().is_err());
        config.shgat.num_heads = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let err = SherpaConfig::from_toml("not [valid").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
