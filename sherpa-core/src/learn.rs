//! The online learning loop: folds every completed execution back into the
//! hypergraph, the trace store, and the replay queue.
//!
//! For each run: parent→child relations become `contains` edges and
//! consecutive siblings become `sequence` edges (both through provenance
//! promotion), the owning capability's success rate refreshes its
//! hyperedge weight, the trace is saved with its TD-error priority, and
//! the stats cache drops every tool involved.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use sherpa_graphs::{EdgeType, GraphError, GraphUpdate};

use crate::engine::HypergraphService;
use crate::error::{Result, SherpaError};
use crate::features::FeatureExtractor;
use crate::replay::td_error_priority;
use crate::shgat::{Level, ShgatModel, TrainExample, TrainReport};
use crate::store::SherpaStore;
use crate::types::{ExecutionTrace, TraceId, TraceInput};

/// One run and its nested child runs, as recorded by the agent runtime.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub input: TraceInput,
    pub children: Vec<RunRecord>,
}

impl RunRecord {
    pub fn leaf(input: TraceInput) -> Self {
        Self {
            input,
            children: Vec::new(),
        }
    }
}

/// Outcome of folding one run.
#[derive(Debug, Clone)]
pub struct FoldReport {
    pub root: ExecutionTrace,
    pub traces_saved: usize,
    pub edges_observed: usize,
    pub priority: f64,
}

/// The post-execution learning loop (C6).
#[derive(Debug)]
pub struct LearningLoop {
    engine: Arc<HypergraphService>,
    store: Arc<dyn SherpaStore>,
    features: Arc<FeatureExtractor>,
    model: Arc<RwLock<ShgatModel>>,
    /// Root traces awaiting a background training pass.
    pending: Mutex<VecDeque<TraceId>>,
}

impl LearningLoop {
    pub fn new(
        engine: Arc<HypergraphService>,
        store: Arc<dyn SherpaStore>,
        features: Arc<FeatureExtractor>,
        model: Arc<RwLock<ShgatModel>>,
    ) -> Self {
        Self {
            engine,
            store,
            features,
            model,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Fold one completed run (and its children) into the engine.
    pub async fn fold(&self, record: RunRecord) -> Result<FoldReport> {
        let mut edges_observed = 0;
        let mut touched: HashSet<String> = HashSet::new();

        self.observe_structure(&record, &mut edges_observed, &mut touched)?;

        // Capability success-rate → hyperedge weight refresh has to see the
        // new trace, so save first, then refresh.
        let priority = self.priority_for(&record.input);
        let mut traces_saved = 0;
        let root = self
            .save_tree(&record, None, priority, &mut traces_saved)
            .await?;

        for capability in Self::capability_nodes(&record) {
            self.refresh_capability_weight(&capability).await?;
        }

        for tool in &touched {
            self.features.invalidate(tool);
        }

        self.pending.lock().unwrap().push_back(root.trace_id);

        info!(
            trace = %root.trace_id,
            traces = traces_saved,
            edges = edges_observed,
            priority,
            "Run folded into hypergraph"
        );
        Ok(FoldReport {
            root,
            traces_saved,
            edges_observed,
            priority,
        })
    }

    /// `contains` for every parent→child, `sequence` for consecutive
    /// siblings. Self-loops are never created; duplicate sibling pairs
    /// observe the same edge (idempotent by construction).
    fn observe_structure(
        &self,
        record: &RunRecord,
        edges_observed: &mut usize,
        touched: &mut HashSet<String>,
    ) -> Result<()> {
        let parent_node = &record.input.node_id;
        touched.insert(parent_node.clone());
        for node in &record.input.executed_path {
            touched.insert(node.clone());
        }

        for child in &record.children {
            let child_node = &child.input.node_id;
            if child_node != parent_node
                && self.observe_known(parent_node, child_node, EdgeType::Contains)?
            {
                *edges_observed += 1;
            }
            self.observe_structure(child, edges_observed, touched)?;
        }

        let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
        for pair in record.input.executed_path.windows(2) {
            let (from, to) = (&pair[0], &pair[1]);
            if from == to {
                continue;
            }
            if !seen_pairs.insert((from.clone(), to.clone())) {
                continue;
            }
            if self.observe_known(from, to, EdgeType::Sequence)? {
                *edges_observed += 1;
            }
        }
        Ok(())
    }

    /// Observe an edge, skipping endpoints the graph does not know about
    /// (tools can execute before registration catches up).
    fn observe_known(&self, from: &str, to: &str, edge_type: EdgeType) -> Result<bool> {
        match self.engine.observe_edge(from, to, edge_type) {
            Ok(_) => Ok(true),
            Err(SherpaError::Graph(GraphError::UnknownNode(node))) => {
                debug!(node, "Skipping edge observation for unregistered node");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// TD-error priority for a run. Cold start (empty model or no intent
    /// embedding) yields the neutral 0.5.
    fn priority_for(&self, input: &TraceInput) -> f64 {
        let model = self.model.read().unwrap();
        let predicted = match (&input.intent_embedding, model.is_cold()) {
            (Some(intent), false) => {
                Some(model.predict_path_success(intent, &input.executed_path))
            }
            _ => None,
        };
        td_error_priority(predicted, input.success)
    }

    async fn save_tree(
        &self,
        record: &RunRecord,
        parent: Option<TraceId>,
        priority: f64,
        saved: &mut usize,
    ) -> Result<ExecutionTrace> {
        let mut input = record.input.clone();
        input.parent_trace_id = parent;
        input.priority = Some(priority);
        let trace = self.store.save_trace(input).await?;
        *saved += 1;
        for child in &record.children {
            let child_priority = self.priority_for(&child.input);
            Box::pin(self.save_tree(child, Some(trace.trace_id), child_priority, saved))
                .await?;
        }
        Ok(trace)
    }

    fn capability_nodes(record: &RunRecord) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![record];
        while let Some(r) = stack.pop() {
            if r.input.kind == crate::types::TraceKind::CapabilityRun {
                out.push(r.input.node_id.clone());
            }
            stack.extend(r.children.iter());
        }
        out
    }

    /// Recompute a capability's success rate over its trace history and
    /// push it into the capability hyperedge's weight (floored away from
    /// zero so traversal cost stays finite).
    async fn refresh_capability_weight(&self, capability: &str) -> Result<()> {
        let traces = self.store.traces_mentioning(capability).await?;
        if traces.is_empty() {
            return Ok(());
        }
        #[allow(clippy::cast_precision_loss)]
        let success_rate =
            traces.iter().filter(|t| t.success).count() as f64 / traces.len() as f64;

        match self.engine.apply_update(GraphUpdate::WeightSet {
            edge: capability.to_string(),
            weight: success_rate.max(0.05),
        }) {
            Ok(_) => {
                debug!(capability, success_rate, "Capability weight refreshed");
                Ok(())
            }
            // Capabilities modelled as edge chains have no single edge
            // under their own id; nothing to refresh.
            Err(SherpaError::Graph(GraphError::UnknownEdge(_))) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drain the queue of traces awaiting background training.
    pub fn drain_pending(&self) -> Vec<TraceId> {
        self.pending.lock().unwrap().drain(..).collect()
    }

    /// Build training examples from stored traces and run one batch.
    /// Traces without an intent embedding are skipped.
    pub async fn train_from_traces(
        &self,
        traces: &[ExecutionTrace],
    ) -> Result<Option<TrainReport>> {
        let mut examples = Vec::new();
        for trace in traces {
            let Some(intent) = &trace.intent_embedding else {
                continue;
            };
            let Some(candidate_embedding) = self.engine.node_embedding(&trace.node_id) else {
                continue;
            };
            let level = self
                .engine
                .node_kind(&trace.node_id)
                .map_or(Level::Capability, Level::from);
            let graph = self.engine.graph_features(&trace.node_id, &[]);
            let bundle = self
                .features
                .extract(intent, &trace.node_id, candidate_embedding, &[], graph)
                .await?;
            examples.push(TrainExample {
                intent: intent.clone(),
                bundle,
                level,
                outcome: trace.success,
            });
        }
        if examples.is_empty() {
            return Ok(None);
        }
        let report = self
            .model
            .write()
            .unwrap()
            .train_batch(&examples)
            .map_err(SherpaError::Model)?;
        Ok(Some(report))
    }
}

// ── Tests ──────────────────────────────────────────────────────────
