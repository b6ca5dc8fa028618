//! Engine assembly: wires the store, hypergraph service, feature
//! extractor, attention model, learning loop, and predictor into one
//! handle the CLI and MCP server share.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::info;

use sherpa_graphs::NodeKind;

use crate::config::SherpaConfig;
use crate::embed::{Embedder, build_embedder};
use crate::engine::HypergraphService;
use crate::error::Result;
use crate::features::FeatureExtractor;
use crate::learn::LearningLoop;
use crate::predict::{BlendMode, Predictor, PredictorOptions};
use crate::shgat::{Level, ShgatModel};
use crate::store::SherpaStore;
use crate::store::sqlite::SqliteStore;
use crate::types::{Embedding, EngineStats};

/// A fully wired Sherpa engine.
#[derive(Debug)]
pub struct SherpaRuntime {
    pub config: SherpaConfig,
    pub store: Arc<dyn SherpaStore>,
    pub engine: Arc<HypergraphService>,
    pub features: Arc<FeatureExtractor>,
    pub model: Arc<RwLock<ShgatModel>>,
    pub embedder: Arc<dyn Embedder>,
    pub predictor: Predictor,
    pub learner: LearningLoop,
}

impl SherpaRuntime {
    /// Open the engine against an on-disk database, restoring the graph
    /// snapshot and model parameters if present.
    pub async fn open(config: SherpaConfig, db_path: &Path) -> Result<Self> {
        let store: Arc<dyn SherpaStore> = Arc::new(SqliteStore::open(db_path)?);
        Self::assemble(config, store, true).await
    }

    /// In-memory engine (tests, demos).
    pub async fn in_memory(config: SherpaConfig) -> Result<Self> {
        let store: Arc<dyn SherpaStore> = Arc::new(SqliteStore::in_memory()?);
        Self::assemble(config, store, false).await
    }

    async fn assemble(
        config: SherpaConfig,
        store: Arc<dyn SherpaStore>,
        restore: bool,
    ) -> Result<Self> {
        let engine = Arc::new(HypergraphService::new(&config));
        let features = Arc::new(FeatureExtractor::new(
            Arc::clone(&store),
            config.stats.clone(),
        ));
        let mut model = ShgatModel::new(config.shgat.clone(), config.engine.embedding_dim);
        let embedder = build_embedder(&config.embedder, config.engine.embedding_dim)?;

        if restore {
            engine.restore_snapshot(store.as_ref()).await?;
            for level in [Level::Tool, Level::Capability, Level::Meta] {
                if let Some(blob) = store.load_model_params(level.as_str()).await? {
                    match model.load_params_blob(level, &blob) {
                        Ok(()) => info!(level = level.as_str(), "Model parameters restored"),
                        // Shape drift after a config change: keep the fresh
                        // initialization rather than refusing to open.
                        Err(e) => tracing::warn!(
                            level = level.as_str(),
                            error = %e,
                            "Stored model parameters incompatible, reinitializing"
                        ),
                    }
                }
            }
            // Re-register everything scorable from the restored graph.
            let mut registered = 0;
            for kind in [NodeKind::Tool, NodeKind::Capability, NodeKind::MetaCapability] {
                for id in engine.nodes_of_kind(kind) {
                    if let Some(embedding) = engine.node_embedding(&id) {
                        model.register_node(&id, Level::from(kind), embedding);
                        registered += 1;
                    }
                }
            }
            info!(
                nodes = engine.node_count(),
                edges = engine.edge_count(),
                registered,
                "Engine state restored"
            );
        }

        let model = Arc::new(RwLock::new(model));
        let predictor = Predictor::new(
            Arc::clone(&engine),
            Arc::clone(&model),
            Arc::clone(&features),
            Arc::clone(&embedder),
            PredictorOptions {
                thompson_threshold: config.predict.thompson_threshold,
                max_confidence: config.predict.max_confidence,
                blend: BlendMode::default(),
            },
        );
        let learner = LearningLoop::new(
            Arc::clone(&engine),
            Arc::clone(&store),
            Arc::clone(&features),
            Arc::clone(&model),
        );

        Ok(Self {
            config,
            store,
            engine,
            features,
            model,
            embedder,
            predictor,
            learner,
        })
    }

    /// Register a node in both the graph and the scorer. The node's
    /// description is embedded through the configured embedder.
    pub async fn register_node(
        &self,
        id: &str,
        kind: NodeKind,
        description: &str,
    ) -> Result<Embedding> {
        let embedding = self.embedder.embed(description).await?;
        self.engine.add_node(id, kind, &embedding)?;
        self.model
            .write()
            .unwrap()
            .register_node(id, Level::from(kind), embedding.clone());
        Ok(embedding)
    }

    /// Persist the graph snapshot and all model parameter levels.
    pub async fn persist(&self) -> Result<()> {
        self.engine.persist_snapshot(self.store.as_ref()).await?;
        let blobs: Vec<(Level, Vec<u8>)> = {
            let model = self.model.read().unwrap();
            [Level::Tool, Level::Capability, Level::Meta]
                .into_iter()
                .map(|level| Ok((level, model.params_blob(level)?)))
                .collect::<Result<_>>()?
        };
        for (level, blob) in blobs {
            self.store.save_model_params(level.as_str(), &blob).await?;
        }
        Ok(())
    }

    /// Engine-wide metrics.
    pub async fn stats(&self) -> Result<EngineStats> {
        let (nodes_by_kind, edges_by_type) = self.engine.census();
        let pagerank = self.engine.pagerank();
        #[allow(clippy::cast_precision_loss)]
        let avg_pagerank = if pagerank.is_empty() {
            0.0
        } else {
            pagerank.values().sum::<f64>() / pagerank.len() as f64
        };
        Ok(EngineStats {
            node_count: self.engine.node_count() as u64,
            edge_count: self.engine.edge_count() as u64,
            nodes_by_kind: nodes_by_kind.into_iter().collect::<BTreeMap<_, _>>(),
            edges_by_type: edges_by_type.into_iter().collect::<BTreeMap<_, _>>(),
            graph_version: self.engine.version(),
            avg_pagerank,
            traces: self.store.stats().await?,
            stats_cache_hit_rate: self.features.hit_rate(),
            avg_alpha: self.predictor.avg_alpha(),
        })
    }
}
