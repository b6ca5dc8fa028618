pub mod cache;
pub mod providers;

use std::sync::Arc;

use crate::config::EmbedderSection;
use crate::error::EmbedError;
use crate::types::Embedding;

/// Common interface for intent/description embedders. Implementations must
/// return unit-norm vectors of a fixed dimension.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync + std::fmt::Debug {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// The model ID being used.
    fn model_id(&self) -> &str;

    /// Output dimension of every embedding.
    fn dim(&self) -> usize;

    /// Embed one text.
    async fn embed(&self, text: &str) -> crate::error::Result<Embedding>;

    /// Embed a batch; the default delegates one by one.
    async fn embed_batch(&self, texts: &[String]) -> crate::error::Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Build the configured embedder. `"hash"` is fully offline and
/// deterministic; `"http"` talks to an embedding API.
pub fn build_embedder(
    config: &EmbedderSection,
    dim: usize,
) -> crate::error::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(providers::HashEmbedder::new(dim))),
        "http" => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                EmbedError::Config(format!("{} is not set", config.api_key_env))
            })?;
            let base_url = config.base_url.clone().ok_or_else(|| {
                EmbedError::Config("embedder.base_url is required for the http provider".into())
            })?;
            Ok(Arc::new(providers::HttpEmbedder::new(
                base_url,
                config.model.clone(),
                api_key,
                dim,
                config.max_retries,
            )?))
        }
        other => Err(EmbedError::Config(format!("unknown embedder provider: {other}")).into()),
    }
}
