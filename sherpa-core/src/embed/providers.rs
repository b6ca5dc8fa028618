use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::EmbedError;
use crate::types::Embedding;

use super::Embedder;

// ── Deterministic offline embedder ─────────────────────────────────

/// Token-hashing embedder: each whitespace/underscore-separated token is
/// hashed into a handful of dimensions, so texts sharing vocabulary land
/// near each other. Fully deterministic and offline — the default for
/// tests, the CLI, and cold installs.
#[derive(Debug)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn token_dims(&self, token: &str) -> [usize; 3] {
        let mut dims = [0usize; 3];
        for (i, dim) in dims.iter_mut().enumerate() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            i.hash(&mut hasher);
            *dim = (hasher.finish() as usize) % self.dim;
        }
        dims
    }
}

#[async_trait::async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn model_id(&self) -> &str {
        "token-hash-v1"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> crate::error::Result<Embedding> {
        if text.trim().is_empty() {
            return Err(crate::error::SherpaError::InvalidInput(
                "cannot embed empty text".into(),
            ));
        }
        let mut raw = vec![0.0_f32; self.dim];
        for token in text
            .split(|c: char| c.is_whitespace() || c == '_' || c == '-' || c == '.')
            .filter(|t| !t.is_empty())
        {
            let lower = token.to_lowercase();
            for dim in self.token_dims(&lower) {
                raw[dim] += 1.0;
            }
        }
        Embedding::try_new(raw).ok_or_else(|| {
            EmbedError::Parse("hash embedder produced a degenerate vector".into()).into()
        })
    }
}

// ── HTTP embedder ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Embedding API client. Transient failures (network, HTTP 5xx, 429) are
/// retried with exponential backoff up to `max_retries` attempts.
#[derive(Debug)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    dim: usize,
    max_retries: u32,
}

impl HttpEmbedder {
    pub fn new(
        base_url: String,
        model: String,
        api_key: String,
        dim: usize,
        max_retries: u32,
    ) -> Result<Self, EmbedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EmbedError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            dim,
            max_retries,
        })
    }

    async fn call_once(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbedError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await
            .map_err(|e| EmbedError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Parse(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .map(|d| {
                if d.embedding.len() != self.dim {
                    return Err(EmbedError::DimensionMismatch {
                        expected: self.dim,
                        got: d.embedding.len(),
                    });
                }
                Embedding::try_new(d.embedding)
                    .ok_or_else(|| EmbedError::Parse("non-finite embedding component".into()))
            })
            .collect()
    }

    fn is_transient(err: &EmbedError) -> bool {
        match err {
            EmbedError::Network(_) => true,
            EmbedError::ApiError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[async_trait::async_trait]
impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        "http"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> crate::error::Result<Embedding> {
        let batch = self.embed_batch(&[text.to_string()]).await?;
        batch
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Parse("empty embedding response".into()).into())
    }

    async fn embed_batch(&self, texts: &[String]) -> crate::error::Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut attempt = 0;
        loop {
            match self.call_once(texts).await {
                Ok(embeddings) => {
                    debug!(count = embeddings.len(), "Embedded batch");
                    return Ok(embeddings);
                }
                Err(err) if Self::is_transient(&err) && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(200 * (1 << attempt));
                    warn!(attempt, ?backoff, error = %err, "Transient embedding failure, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::cosine;

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(256);
        let a = embedder.embed("validate the payment").await.unwrap();
        let b = embedder.embed("validate the payment").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn hash_embedder_unit_norm() {
        let embedder = HashEmbedder::new(256);
        let e = embedder.embed("charge the card").await.unwrap();
        let norm: f64 = e
            .as_slice()
            .iter()
            .map(|&x| f64::from(x) * f64::from(x))
            .sum::<f64>()
            .sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(e.dim(), 256);
    }

    #[tokio::test]
    async fn shared_vocabulary_is_closer() {
        let embedder = HashEmbedder::new(512);
        let payment_intent = embedder.embed("process a payment").await.unwrap();
        let payment_cap = embedder
            .embed("payment validation and charge tools")
            .await
            .unwrap();
        let profile_cap = embedder
            .embed("fetch user profile and avatar")
            .await
            .unwrap();

        let to_payment = cosine(payment_intent.as_slice(), payment_cap.as_slice());
        let to_profile = cosine(payment_intent.as_slice(), profile_cap.as_slice());
        assert!(
            to_payment > to_profile,
            "payment intent should sit closer to the payment capability \
             ({to_payment} vs {to_profile})"
        );
    }

    #[tokio::test]
    async fn empty_text_rejected() {
        let embedder = HashEmbedder::new(64);
        assert!(embedder.embed("   ").await.is_err());
    }

    #[test]
    fn transient_classification() {
        assert!(HttpEmbedder::is_transient(&EmbedError::Network("reset".into())));
        assert!(HttpEmbedder::is_transient(&EmbedError::ApiError {
            status: 503,
            body: String::new()
        }));
        assert!(HttpEmbedder::is_transient(&EmbedError::ApiError {
            status: 429,
            body: String::new()
        }));
        assert!(!HttpEmbedder::is_transient(&EmbedError::ApiError {
            status: 401,
            body: String::new()
        }));
        assert!(!HttpEmbedder::is_transient(&EmbedError::Parse("bad".into())));
    }
}
