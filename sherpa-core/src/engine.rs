//! The hypergraph service: single-writer ownership of the graph, snapshot
//! version reads, version-tagged derived caches, and the edge event
//! channel.
//!
//! Derived quantities (PageRank, communities, spectral clusters) are
//! recomputed lazily on first read after a version bump; consumers get
//! values tagged with the version they were computed at.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{info, warn};

use sherpa_graphs::community::louvain_communities;
use sherpa_graphs::diffusion::{DiffusionConfig, heat_diffusion};
use sherpa_graphs::hyperpath::{DynamicSssp, shortest_hyperpath};
use sherpa_graphs::metrics::{adamic_adar_with, context_co_occurrence, neighbourhoods};
use sherpa_graphs::pagerank::{PageRankConfig, pagerank};
use sherpa_graphs::spectral::{SpectralConfig, spectral_clusters};
use sherpa_graphs::{
    EdgeRecord, EdgeType, GraphError, GraphUpdate, Hypergraph, HyperedgeSpec, NodeIdx, NodeKind,
    NodeRecord, UpdateKind,
};

use crate::config::SherpaConfig;
use crate::error::{Result, SherpaError};
use crate::provides::{ToolSchema, infer_coverage};
use crate::store::SherpaStore;
use crate::types::{Embedding, GraphFeatures};

/// Edge lifecycle events, for the scorer and predictor layers.
#[derive(Debug, Clone)]
pub enum EdgeEvent {
    Created { edge_id: String },
    Updated { edge_id: String },
    Removed { edge_id: String },
}

/// A shortest-hyperpath result expressed in external node/edge ids.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HyperpathView {
    pub found: bool,
    pub node_sequence: Vec<String>,
    pub hyperedges_used: Vec<String>,
    pub total_weight: f64,
}

#[derive(Debug, Default)]
struct DerivedCaches {
    pagerank: Option<(u64, Arc<HashMap<String, f64>>)>,
    communities: Option<(u64, Arc<HashMap<String, u32>>)>,
    clusters: Option<(u64, Arc<HashMap<String, u32>>)>,
}

/// Single-writer hypergraph with derived caches and an event channel.
#[derive(Debug)]
pub struct HypergraphService {
    graph: RwLock<Hypergraph>,
    derived: Mutex<DerivedCaches>,
    events: broadcast::Sender<EdgeEvent>,
    spectral_k: usize,
}

fn map_graph_err(err: GraphError) -> SherpaError {
    match err {
        GraphError::DeadlineExceeded => SherpaError::Cancelled,
        other => other.into(),
    }
}

impl HypergraphService {
    pub fn new(config: &SherpaConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            graph: RwLock::new(Hypergraph::with_config(
                config.drdsp.cost_floor,
                config.edge.observed_threshold,
            )),
            derived: Mutex::new(DerivedCaches::default()),
            events,
            spectral_k: 4,
        }
    }

    /// Subscribe to edge lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<EdgeEvent> {
        self.events.subscribe()
    }

    pub fn version(&self) -> u64 {
        self.graph.read().unwrap().version()
    }

    pub fn node_count(&self) -> usize {
        self.graph.read().unwrap().node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.read().unwrap().edge_count()
    }

    /// Counts by node kind and edge type, for engine stats.
    pub fn census(&self) -> (HashMap<String, u64>, HashMap<String, u64>) {
        let graph = self.graph.read().unwrap();
        let mut nodes: HashMap<String, u64> = HashMap::new();
        for (_, node) in graph.iter_nodes() {
            *nodes.entry(node.kind.as_str().to_string()).or_default() += 1;
        }
        let mut edges: HashMap<String, u64> = HashMap::new();
        for (_, he) in graph.iter_edges() {
            *edges.entry(he.edge_type.as_str().to_string()).or_default() += 1;
        }
        (nodes, edges)
    }

    // ── Mutation ───────────────────────────────────────────────────

    pub fn add_node(&self, id: &str, kind: NodeKind, embedding: &Embedding) -> Result<()> {
        let mut graph = self.graph.write().unwrap();
        graph
            .add_node(id, kind, embedding.as_slice().to_vec())
            .map_err(map_graph_err)?;
        Ok(())
    }

    /// Record that `parent` contains `child` in the capability hierarchy.
    pub fn link_hierarchy(&self, parent: &str, child: &str) -> Result<()> {
        let mut graph = self.graph.write().unwrap();
        let p = graph.resolve_node(parent).map_err(map_graph_err)?;
        let c = graph.resolve_node(child).map_err(map_graph_err)?;
        graph.link_hierarchy(p, c).map_err(map_graph_err)?;
        Ok(())
    }

    pub fn add_hyperedge(&self, spec: HyperedgeSpec) -> Result<String> {
        let edge_id = spec.id.clone();
        {
            let mut graph = self.graph.write().unwrap();
            graph.add_hyperedge(spec).map_err(map_graph_err)?;
        }
        let _ = self.events.send(EdgeEvent::Created {
            edge_id: edge_id.clone(),
        });
        Ok(edge_id)
    }

    /// Apply a mutation and broadcast the corresponding event.
    pub fn apply_update(&self, update: GraphUpdate) -> Result<UpdateKind> {
        let kind = {
            let mut graph = self.graph.write().unwrap();
            graph.apply_update(update).map_err(map_graph_err)?
        };
        let graph = self.graph.read().unwrap();
        let event = match &kind {
            UpdateKind::EdgeAdded { edge } => graph.edge(*edge).map(|he| EdgeEvent::Created {
                edge_id: he.id.clone(),
            }),
            UpdateKind::WeightChanged { edge, .. } => {
                graph.edge(*edge).map(|he| EdgeEvent::Updated {
                    edge_id: he.id.clone(),
                })
            }
            UpdateKind::EdgeObserved { edge, created, .. } => {
                graph.edge(*edge).map(|he| {
                    if *created {
                        EdgeEvent::Created {
                            edge_id: he.id.clone(),
                        }
                    } else {
                        EdgeEvent::Updated {
                            edge_id: he.id.clone(),
                        }
                    }
                })
            }
            UpdateKind::EdgeRemoved { record, .. } => Some(EdgeEvent::Removed {
                edge_id: record.id.clone(),
            }),
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        Ok(kind)
    }

    /// Learning-loop entry: observe (or create) the pairwise projected edge
    /// and promote its provenance.
    pub fn observe_edge(&self, from: &str, to: &str, edge_type: EdgeType) -> Result<UpdateKind> {
        self.apply_update(GraphUpdate::ObserveEdge {
            from: from.to_string(),
            to: to.to_string(),
            edge_type,
        })
    }

    /// Latch the graph read-only after an internal invariant violation.
    pub fn poison(&self, reason: &str) {
        warn!(reason, "Latching hypergraph read-only");
        self.graph.write().unwrap().mark_read_only();
    }

    /// Remove nodes with no incident hyperedges (explicit GC; never called
    /// on the hot path). Returns the number removed.
    pub fn sweep_unreferenced(&self) -> Result<u64> {
        let mut graph = self.graph.write().unwrap();
        let candidates: Vec<(NodeIdx, String)> = graph
            .iter_nodes()
            .filter(|(idx, node)| {
                graph.edges_from(*idx).next().is_none()
                    && graph.edges_into(*idx).next().is_none()
                    && graph.node_idx(&node.id) == Some(*idx)
            })
            .map(|(idx, node)| (idx, node.id.clone()))
            .collect();
        let mut removed = 0;
        for (idx, id) in candidates {
            match graph.remove_node(idx) {
                Ok(()) => removed += 1,
                Err(e) => warn!(node = %id, error = %e, "GC skip"),
            }
        }
        Ok(removed)
    }

    // ── Provides inference ─────────────────────────────────────────

    /// Infer a `provides` edge from producer/consumer schemas. Coverage maps
    /// to provenance (strict → observed, partial → inferred, optional →
    /// template); no edge is created when nothing matches.
    pub fn infer_provides(
        &self,
        producer: &str,
        producer_schema: &ToolSchema,
        consumer: &str,
        consumer_schema: &ToolSchema,
        strict: bool,
    ) -> Result<Option<String>> {
        let Some(coverage) = infer_coverage(producer_schema, consumer_schema, strict) else {
            return Ok(None);
        };
        let edge_id = format!("{producer}->{consumer}:provides");
        if self.graph.read().unwrap().edge_idx(&edge_id).is_some() {
            return Ok(Some(edge_id));
        }
        let mut spec = HyperedgeSpec::pairwise(
            edge_id.clone(),
            producer,
            consumer,
            EdgeType::Provides,
            coverage.edge_source(),
        );
        spec.metadata.insert(
            "coverage".into(),
            serde_json::to_value(coverage).map_err(crate::error::StoreError::Serialization)?,
        );
        self.add_hyperedge(spec)?;
        Ok(Some(edge_id))
    }

    // ── Lookups ────────────────────────────────────────────────────

    pub fn node_kind(&self, id: &str) -> Option<NodeKind> {
        let graph = self.graph.read().unwrap();
        graph.node_idx(id).map(|idx| graph.node(idx).kind)
    }

    pub fn node_embedding(&self, id: &str) -> Option<Embedding> {
        let graph = self.graph.read().unwrap();
        let idx = graph.node_idx(id)?;
        let raw = graph.node(idx).embedding.clone();
        if raw.is_empty() {
            None
        } else {
            Some(Embedding::unit(raw))
        }
    }

    /// Ids of all nodes of a kind, sorted.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<String> {
        let graph = self.graph.read().unwrap();
        let mut ids: Vec<String> = graph
            .iter_nodes()
            .filter(|(idx, n)| n.kind == kind && graph.node_idx(&n.id) == Some(*idx))
            .map(|(_, n)| n.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// The tool sequence of a capability: hierarchy children in insertion
    /// order.
    pub fn capability_tools(&self, capability: &str) -> Vec<String> {
        let graph = self.graph.read().unwrap();
        let Some(idx) = graph.node_idx(capability) else {
            return Vec::new();
        };
        graph
            .node(idx)
            .children
            .iter()
            .map(|&c| graph.node(c).id.clone())
            .collect()
    }

    /// Children of a meta-capability (its member capabilities).
    pub fn children_of(&self, id: &str) -> Vec<String> {
        self.capability_tools(id)
    }

    pub fn edge_weight(&self, edge_id: &str) -> Option<f64> {
        let graph = self.graph.read().unwrap();
        let idx = graph.edge_idx(edge_id)?;
        graph.edge(idx).map(|he| he.weight)
    }

    // ── Derived quantities ─────────────────────────────────────────

    /// PageRank over the bipartite projection, cached per graph version.
    pub fn pagerank(&self) -> Arc<HashMap<String, f64>> {
        let graph = self.graph.read().unwrap();
        let version = graph.version();
        {
            let derived = self.derived.lock().unwrap();
            if let Some((v, scores)) = &derived.pagerank {
                if *v == version {
                    return Arc::clone(scores);
                }
            }
        }
        let scores = pagerank(&graph, &PageRankConfig::default());
        let by_id: Arc<HashMap<String, f64>> = Arc::new(
            scores
                .into_iter()
                .map(|(idx, score)| (graph.node(idx).id.clone(), score))
                .collect(),
        );
        info!(version, nodes = by_id.len(), "PageRank refreshed");
        self.derived.lock().unwrap().pagerank = Some((version, Arc::clone(&by_id)));
        by_id
    }

    /// Louvain communities over the pairwise projection, cached per version.
    pub fn communities(&self) -> Arc<HashMap<String, u32>> {
        let graph = self.graph.read().unwrap();
        let version = graph.version();
        {
            let derived = self.derived.lock().unwrap();
            if let Some((v, communities)) = &derived.communities {
                if *v == version {
                    return Arc::clone(communities);
                }
            }
        }
        let assignment = louvain_communities(&graph);
        let by_id: Arc<HashMap<String, u32>> = Arc::new(
            assignment
                .into_iter()
                .map(|(idx, c)| (graph.node(idx).id.clone(), c))
                .collect(),
        );
        info!(version, "Communities refreshed");
        self.derived.lock().unwrap().communities = Some((version, Arc::clone(&by_id)));
        by_id
    }

    /// Spectral clusters of the tool × capability structure, cached per
    /// version.
    pub fn spectral_clusters(&self) -> Arc<HashMap<String, u32>> {
        let graph = self.graph.read().unwrap();
        let version = graph.version();
        {
            let derived = self.derived.lock().unwrap();
            if let Some((v, clusters)) = &derived.clusters {
                if *v == version {
                    return Arc::clone(clusters);
                }
            }
        }
        let assignment = spectral_clusters(
            &graph,
            &SpectralConfig {
                k: self.spectral_k,
                ..SpectralConfig::default()
            },
        );
        let by_id: Arc<HashMap<String, u32>> = Arc::new(
            assignment
                .into_iter()
                .map(|(idx, c)| (graph.node(idx).id.clone(), c))
                .collect(),
        );
        info!(version, "Spectral clusters refreshed");
        self.derived.lock().unwrap().clusters = Some((version, Arc::clone(&by_id)));
        by_id
    }

    /// Heat spread from the context nodes, read at one candidate.
    pub fn heat_at(&self, seeds: &[String], candidate: &str) -> f64 {
        let graph = self.graph.read().unwrap();
        let seed_idx: Vec<NodeIdx> = seeds
            .iter()
            .filter_map(|id| graph.node_idx(id))
            .collect();
        let Some(cand) = graph.node_idx(candidate) else {
            return 0.0;
        };
        if seed_idx.is_empty() {
            return 0.0;
        }
        heat_diffusion(&graph, &seed_idx, &DiffusionConfig::default())
            .get(&cand)
            .copied()
            .unwrap_or(0.0)
    }

    /// Assemble version-tagged graph features for one candidate against a
    /// context set.
    pub fn graph_features(&self, candidate: &str, context: &[String]) -> GraphFeatures {
        let pagerank = self.pagerank().get(candidate).copied().unwrap_or(0.0);
        let clusters = self.spectral_clusters();
        let cluster_id = clusters.get(candidate).copied();
        let cluster_co_membership = cluster_id.is_some_and(|c| {
            context
                .iter()
                .any(|ctx| clusters.get(ctx).copied() == Some(c))
        });

        let graph = self.graph.read().unwrap();
        let version = graph.version();
        let (co_occurrence, adamic) = match graph.node_idx(candidate) {
            Some(cand) => {
                let ctx_idx: Vec<NodeIdx> = context
                    .iter()
                    .filter_map(|id| graph.node_idx(id))
                    .collect();
                let cooc = context_co_occurrence(&graph, cand, &ctx_idx);
                let sets = neighbourhoods(&graph);
                let adamic = ctx_idx
                    .iter()
                    .map(|&c| adamic_adar_with(&sets, cand, c))
                    .fold(0.0_f64, f64::max);
                (cooc, adamic)
            }
            None => (0.0, 0.0),
        };
        drop(graph);

        GraphFeatures {
            pagerank,
            cluster_id,
            cluster_co_membership,
            co_occurrence,
            adamic_adar: adamic,
            heat_diffusion: self.heat_at(context, candidate),
            graph_version: version,
        }
    }

    // ── Hyperpaths ─────────────────────────────────────────────────

    /// Shortest hyperpath between two nodes by external id. Disconnection
    /// is `found: false`, not an error.
    pub fn find_shortest_hyperpath(
        &self,
        from: &str,
        to: &str,
        deadline: Option<Instant>,
    ) -> Result<HyperpathView> {
        let graph = self.graph.read().unwrap();
        let src = graph.resolve_node(from).map_err(map_graph_err)?;
        let dst = graph.resolve_node(to).map_err(map_graph_err)?;
        let path = shortest_hyperpath(&graph, src, dst, deadline).map_err(map_graph_err)?;
        Ok(HyperpathView {
            found: path.found,
            node_sequence: path
                .node_sequence
                .iter()
                .map(|&n| graph.node(n).id.clone())
                .collect(),
            hyperedges_used: path
                .hyperedges_used
                .iter()
                .filter_map(|&e| graph.edge(e).map(|he| he.id.clone()))
                .collect(),
            total_weight: path.total_weight,
        })
    }

    /// Single-source distances to every reachable node.
    pub fn find_all_shortest_paths(
        &self,
        from: &str,
        deadline: Option<Instant>,
    ) -> Result<HashMap<String, f64>> {
        let graph = self.graph.read().unwrap();
        let src = graph.resolve_node(from).map_err(map_graph_err)?;
        let sssp = DynamicSssp::compute(&graph, src, deadline).map_err(map_graph_err)?;
        Ok(sssp
            .distances()
            .iter()
            .map(|(&n, &d)| (graph.node(n).id.clone(), d))
            .collect())
    }

    // ── Snapshots ──────────────────────────────────────────────────

    pub async fn persist_snapshot(&self, store: &dyn SherpaStore) -> Result<()> {
        let (nodes, edges) = {
            let graph = self.graph.read().unwrap();
            graph.to_records()
        };
        store.save_graph_snapshot(&nodes, &edges).await?;
        info!(nodes = nodes.len(), edges = edges.len(), "Graph snapshot persisted");
        Ok(())
    }

    pub async fn restore_snapshot(&self, store: &dyn SherpaStore) -> Result<()> {
        let (nodes, edges) = store.load_graph_snapshot().await?;
        self.restore_records(&nodes, &edges)
    }

    pub fn restore_records(&self, nodes: &[NodeRecord], edges: &[EdgeRecord]) -> Result<()> {
        let (cost_floor, threshold) = {
            let graph = self.graph.read().unwrap();
            (graph.cost_floor(), graph.observed_threshold())
        };
        let restored = Hypergraph::from_records(cost_floor, threshold, nodes, edges)
            .map_err(map_graph_err)?;
        *self.graph.write().unwrap() = restored;
        *self.derived.lock().unwrap() = DerivedCaches::default();
        Ok(())
    }

    /// Run a read-only closure against the graph snapshot (for callers that
    /// need richer access than the id-based helpers).
    pub fn with_graph<T>(&self, f: impl FnOnce(&Hypergraph) -> T) -> T {
        f(&self.graph.read().unwrap())
    }
}

// ── Tests ──────────────────────────────────────────────────────────
