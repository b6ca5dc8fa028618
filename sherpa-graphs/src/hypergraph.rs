//! The typed capability hypergraph.
//!
//! Nodes are tools, capabilities, and meta-capabilities; a hyperedge is a
//! directed relation from a set of source nodes to a set of target nodes.
//! Edge weights are derived scalars (type weight × provenance modifier)
//! unless explicitly overridden through [`GraphUpdate::WeightSet`] /
//! [`GraphUpdate::WeightDelta`].
//!
//! External callers address nodes and edges by stable string ids; internally
//! both live in arenas with stable integer indices, and all back-references
//! are indices, never owning pointers.

// Arena indices are u32; graphs here never approach that bound.
#![allow(clippy::cast_possible_truncation)]

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::{GraphError, Result};

// ── Arena indices ──────────────────────────────────────────────────

macro_rules! arena_idx {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

arena_idx!(NodeIdx);
arena_idx!(EdgeIdx);

// ── Node types ─────────────────────────────────────────────────────

/// Hierarchy level of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Tool,
    Capability,
    MetaCapability,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "Tool",
            Self::Capability => "Capability",
            Self::MetaCapability => "MetaCapability",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Tool" => Ok(Self::Tool),
            "Capability" => Ok(Self::Capability),
            "MetaCapability" => Ok(Self::MetaCapability),
            other => Err(format!("unknown node kind: {other}")),
        }
    }
}

/// A node in the hypergraph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperNode {
    /// Stable external id. Opaque to the engine; never parsed.
    pub id: String,
    pub kind: NodeKind,
    /// Unit-norm embedding of the configured dimension. May be empty for
    /// nodes registered before their embedding arrives.
    pub embedding: Vec<f32>,
    /// Hierarchy links (meta-capability → capability → tool).
    pub parents: Vec<NodeIdx>,
    pub children: Vec<NodeIdx>,
}

// ── Edge typing & provenance ───────────────────────────────────────

/// Relationship type of a hyperedge. Closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    Contains,
    Sequence,
    Dependency,
    Provides,
    Alternative,
}

impl EdgeType {
    /// Base weight for this relationship type.
    pub fn type_weight(self) -> f64 {
        match self {
            Self::Contains => 0.8,
            Self::Sequence => 0.5,
            Self::Dependency => 1.0,
            Self::Provides => 0.7,
            Self::Alternative => 0.6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Sequence => "sequence",
            Self::Dependency => "dependency",
            Self::Provides => "provides",
            Self::Alternative => "alternative",
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "contains" => Ok(Self::Contains),
            "sequence" => Ok(Self::Sequence),
            "dependency" => Ok(Self::Dependency),
            "provides" => Ok(Self::Provides),
            "alternative" => Ok(Self::Alternative),
            other => Err(format!("unknown edge type: {other}")),
        }
    }
}

/// Provenance of a hyperedge. Transitions are monotone:
/// `Template → Inferred → Observed`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeSource {
    Template,
    Inferred,
    Observed,
}

impl EdgeSource {
    /// Weight modifier for this provenance level.
    pub fn modifier(self) -> f64 {
        match self {
            Self::Template => 0.5,
            Self::Inferred => 0.7,
            Self::Observed => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Inferred => "inferred",
            Self::Observed => "observed",
        }
    }
}

impl std::fmt::Display for EdgeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EdgeSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "template" => Ok(Self::Template),
            "inferred" => Ok(Self::Inferred),
            "observed" => Ok(Self::Observed),
            other => Err(format!("unknown edge source: {other}")),
        }
    }
}

/// Derived scalar weight: type weight × provenance modifier.
pub fn derived_weight(edge_type: EdgeType, edge_source: EdgeSource) -> f64 {
    edge_type.type_weight() * edge_source.modifier()
}

// ── Hyperedge ──────────────────────────────────────────────────────

/// A directed hyperedge: activating all of `sources` reaches any of `targets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hyperedge {
    pub id: String,
    pub sources: BTreeSet<NodeIdx>,
    pub targets: BTreeSet<NodeIdx>,
    /// Scalar weight in `(0, ∞)`; higher is better, traversal cost is
    /// `1 / max(weight, cost_floor)`.
    pub weight: f64,
    pub edge_type: EdgeType,
    pub edge_source: EdgeSource,
    /// How many times the learning loop has observed this relation.
    pub observed_count: u32,
    /// Graph version at which this edge was last mutated.
    pub version: u64,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Input for creating a hyperedge. `weight: None` derives the scalar from
/// the type/source tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperedgeSpec {
    pub id: String,
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    pub edge_type: EdgeType,
    pub edge_source: EdgeSource,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl HyperedgeSpec {
    /// A 1-source/1-target edge with derived weight.
    pub fn pairwise(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        edge_type: EdgeType,
        edge_source: EdgeSource,
    ) -> Self {
        Self {
            id: id.into(),
            sources: vec![from.into()],
            targets: vec![to.into()],
            edge_type,
            edge_source,
            weight: None,
            metadata: HashMap::new(),
        }
    }
}

// ── Updates ────────────────────────────────────────────────────────

/// Mutation applied through [`Hypergraph::apply_update`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GraphUpdate {
    WeightSet { edge: String, weight: f64 },
    WeightDelta { edge: String, delta: f64 },
    AddHyperedge(HyperedgeSpec),
    RemoveHyperedge { edge: String },
    ObserveEdge { from: String, to: String, edge_type: EdgeType },
}

/// What an update did, in terms incremental subscribers understand.
#[derive(Debug, Clone)]
pub enum UpdateKind {
    /// Traversal cost changed. `old_cost`/`new_cost` are `1/max(w, floor)`.
    WeightChanged {
        edge: EdgeIdx,
        old_cost: f64,
        new_cost: f64,
    },
    EdgeAdded { edge: EdgeIdx },
    /// Edge removed. The retired arena index and the full record are both
    /// carried for subscribers that need the endpoints.
    EdgeRemoved { edge: EdgeIdx, record: Hyperedge },
    /// `ObserveEdge` outcome: created a fresh inferred edge or reinforced
    /// an existing one (possibly promoting its provenance).
    EdgeObserved {
        edge: EdgeIdx,
        created: bool,
        promoted: bool,
        old_cost: f64,
        new_cost: f64,
    },
}

// ── Snapshot records ───────────────────────────────────────────────

/// Persisted form of a node. Lossless round trip with the in-memory arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub kind: NodeKind,
    pub embedding: Vec<f32>,
    pub parents: Vec<String>,
    pub children: Vec<String>,
}

/// Persisted form of a hyperedge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: String,
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    pub weight: f64,
    pub edge_type: EdgeType,
    pub edge_source: EdgeSource,
    pub observed_count: u32,
    pub version: u64,
    pub metadata: HashMap<String, serde_json::Value>,
}

// ── The hypergraph ─────────────────────────────────────────────────

/// In-memory typed hypergraph with arena storage and a monotone version
/// counter. Single-writer: all mutation goes through `&mut self`.
#[derive(Debug, Clone)]
pub struct Hypergraph {
    nodes: Vec<HyperNode>,
    /// `None` marks a retired arena slot (removed edge).
    edges: Vec<Option<Hyperedge>>,
    node_ids: HashMap<String, NodeIdx>,
    edge_ids: HashMap<String, EdgeIdx>,
    /// Per node: edges where the node appears in `sources`.
    source_of: Vec<Vec<EdgeIdx>>,
    /// Per node: edges where the node appears in `targets`.
    target_of: Vec<Vec<EdgeIdx>>,
    version: u64,
    read_only: bool,
    cost_floor: f64,
    observed_threshold: u32,
    live_edges: usize,
}

impl Default for Hypergraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Hypergraph {
    pub fn new() -> Self {
        Self::with_config(0.1, 3)
    }

    /// `cost_floor` clamps the denominator of `1/weight`; `observed_threshold`
    /// is the observation count that promotes provenance to `Observed`.
    pub fn with_config(cost_floor: f64, observed_threshold: u32) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            node_ids: HashMap::new(),
            edge_ids: HashMap::new(),
            source_of: Vec::new(),
            target_of: Vec::new(),
            version: 0,
            read_only: false,
            cost_floor,
            observed_threshold,
            live_edges: 0,
        }
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of live (addressable) nodes.
    pub fn node_count(&self) -> usize {
        self.node_ids.len()
    }

    /// Arena length including retired slots. Algorithms size index-keyed
    /// scratch arrays with this, since `NodeIdx` values are stable.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.live_edges
    }

    pub fn cost_floor(&self) -> f64 {
        self.cost_floor
    }

    pub fn observed_threshold(&self) -> u32 {
        self.observed_threshold
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Latch the graph read-only after an internal invariant violation.
    pub fn mark_read_only(&mut self) {
        self.read_only = true;
    }

    pub fn node(&self, idx: NodeIdx) -> &HyperNode {
        &self.nodes[idx.index()]
    }

    pub fn node_idx(&self, id: &str) -> Option<NodeIdx> {
        self.node_ids.get(id).copied()
    }

    pub fn resolve_node(&self, id: &str) -> Result<NodeIdx> {
        self.node_idx(id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))
    }

    pub fn edge(&self, idx: EdgeIdx) -> Option<&Hyperedge> {
        self.edges.get(idx.index()).and_then(Option::as_ref)
    }

    pub fn edge_idx(&self, id: &str) -> Option<EdgeIdx> {
        self.edge_ids.get(id).copied()
    }

    pub fn resolve_edge(&self, id: &str) -> Result<EdgeIdx> {
        self.edge_idx(id)
            .ok_or_else(|| GraphError::UnknownEdge(id.to_string()))
    }

    /// Live nodes only (retired arena slots are skipped).
    pub fn iter_nodes(&self) -> impl Iterator<Item = (NodeIdx, &HyperNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeIdx(i as u32), n))
            .filter(|(idx, n)| self.node_ids.get(&n.id) == Some(idx))
    }

    pub fn iter_edges(&self) -> impl Iterator<Item = (EdgeIdx, &Hyperedge)> {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (EdgeIdx(i as u32), e)))
    }

    /// Edges where `node` appears in the source set.
    pub fn edges_from(&self, node: NodeIdx) -> impl Iterator<Item = (EdgeIdx, &Hyperedge)> {
        self.source_of[node.index()]
            .iter()
            .filter_map(|&e| self.edge(e).map(|he| (e, he)))
    }

    /// Edges where `node` appears in the target set.
    pub fn edges_into(&self, node: NodeIdx) -> impl Iterator<Item = (EdgeIdx, &Hyperedge)> {
        self.target_of[node.index()]
            .iter()
            .filter_map(|&e| self.edge(e).map(|he| (e, he)))
    }

    /// Traversal cost of a hyperedge: `1 / max(weight, cost_floor)`.
    pub fn cost(&self, edge: &Hyperedge) -> f64 {
        1.0 / edge.weight.max(self.cost_floor)
    }

    // ── Mutation ───────────────────────────────────────────────────

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(GraphError::ReadOnly);
        }
        Ok(())
    }

    pub fn add_node(
        &mut self,
        id: impl Into<String>,
        kind: NodeKind,
        embedding: Vec<f32>,
    ) -> Result<NodeIdx> {
        self.check_writable()?;
        let id = id.into();
        if self.node_ids.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        let idx = NodeIdx(self.nodes.len() as u32);
        self.node_ids.insert(id.clone(), idx);
        self.nodes.push(HyperNode {
            id,
            kind,
            embedding,
            parents: Vec::new(),
            children: Vec::new(),
        });
        self.source_of.push(Vec::new());
        self.target_of.push(Vec::new());
        self.version += 1;
        Ok(idx)
    }

    /// Replace a node's embedding (e.g. when the embedder catches up).
    pub fn set_embedding(&mut self, node: NodeIdx, embedding: Vec<f32>) -> Result<()> {
        self.check_writable()?;
        self.nodes[node.index()].embedding = embedding;
        self.version += 1;
        Ok(())
    }

    /// Record a hierarchy link (parent contains child). Idempotent.
    pub fn link_hierarchy(&mut self, parent: NodeIdx, child: NodeIdx) -> Result<()> {
        self.check_writable()?;
        if !self.nodes[parent.index()].children.contains(&child) {
            self.nodes[parent.index()].children.push(child);
        }
        if !self.nodes[child.index()].parents.contains(&parent) {
            self.nodes[child.index()].parents.push(parent);
        }
        Ok(())
    }

    pub fn add_hyperedge(&mut self, spec: HyperedgeSpec) -> Result<EdgeIdx> {
        self.check_writable()?;
        if self.edge_ids.contains_key(&spec.id) {
            return Err(GraphError::DuplicateEdge(spec.id));
        }
        if spec.sources.is_empty() {
            return Err(GraphError::EmptySet {
                edge: spec.id,
                side: "source",
            });
        }
        if spec.targets.is_empty() {
            return Err(GraphError::EmptySet {
                edge: spec.id,
                side: "target",
            });
        }

        let mut sources = BTreeSet::new();
        for s in &spec.sources {
            let idx = self.node_idx(s).ok_or_else(|| GraphError::DanglingRef {
                edge: spec.id.clone(),
                node: s.clone(),
            })?;
            sources.insert(idx);
        }
        let mut targets = BTreeSet::new();
        for t in &spec.targets {
            let idx = self.node_idx(t).ok_or_else(|| GraphError::DanglingRef {
                edge: spec.id.clone(),
                node: t.clone(),
            })?;
            targets.insert(idx);
        }

        let weight = match spec.weight {
            Some(w) if !w.is_finite() || w <= 0.0 => return Err(GraphError::InvalidWeight(w)),
            Some(w) => w,
            None => derived_weight(spec.edge_type, spec.edge_source),
        };

        self.version += 1;
        let idx = EdgeIdx(self.edges.len() as u32);
        for &s in &sources {
            self.source_of[s.index()].push(idx);
        }
        for &t in &targets {
            self.target_of[t.index()].push(idx);
        }
        self.edge_ids.insert(spec.id.clone(), idx);
        self.edges.push(Some(Hyperedge {
            id: spec.id,
            sources,
            targets,
            weight,
            edge_type: spec.edge_type,
            edge_source: spec.edge_source,
            observed_count: 0,
            version: self.version,
            metadata: spec.metadata,
        }));
        self.live_edges += 1;
        Ok(idx)
    }

    pub fn remove_hyperedge(&mut self, idx: EdgeIdx) -> Result<Hyperedge> {
        self.check_writable()?;
        let slot = self
            .edges
            .get_mut(idx.index())
            .ok_or_else(|| GraphError::UnknownEdge(idx.to_string()))?;
        let edge = slot
            .take()
            .ok_or_else(|| GraphError::UnknownEdge(idx.to_string()))?;
        self.edge_ids.remove(&edge.id);
        for &s in &edge.sources {
            self.source_of[s.index()].retain(|&e| e != idx);
        }
        for &t in &edge.targets {
            self.target_of[t.index()].retain(|&e| e != idx);
        }
        self.live_edges -= 1;
        self.version += 1;
        Ok(edge)
    }

    /// Remove a node. Refused while any hyperedge references it.
    pub fn remove_node(&mut self, idx: NodeIdx) -> Result<()> {
        self.check_writable()?;
        let incident =
            self.source_of[idx.index()].len() + self.target_of[idx.index()].len();
        if incident > 0 {
            return Err(GraphError::NodeReferenced {
                node: self.nodes[idx.index()].id.clone(),
                edges: incident,
            });
        }
        // Arena slots are stable: detach the id and hierarchy links but keep
        // the slot. Retired nodes are invisible to id lookup.
        let id = self.nodes[idx.index()].id.clone();
        self.node_ids.remove(&id);
        let parents = std::mem::take(&mut self.nodes[idx.index()].parents);
        for p in parents {
            self.nodes[p.index()].children.retain(|&c| c != idx);
        }
        let children = std::mem::take(&mut self.nodes[idx.index()].children);
        for c in children {
            self.nodes[c.index()].parents.retain(|&p| p != idx);
        }
        self.version += 1;
        Ok(())
    }

    /// Apply a mutation, bump the version, and describe the effect for
    /// incremental subscribers.
    pub fn apply_update(&mut self, update: GraphUpdate) -> Result<UpdateKind> {
        self.check_writable()?;
        match update {
            GraphUpdate::WeightSet { edge, weight } => {
                if !weight.is_finite() || weight <= 0.0 {
                    return Err(GraphError::InvalidWeight(weight));
                }
                let idx = self.resolve_edge(&edge)?;
                self.version += 1;
                let floor = self.cost_floor;
                let version = self.version;
                let he = self.edges[idx.index()]
                    .as_mut()
                    .ok_or(GraphError::UnknownEdge(edge))?;
                let old_cost = 1.0 / he.weight.max(floor);
                he.weight = weight;
                he.version = version;
                let new_cost = 1.0 / he.weight.max(floor);
                Ok(UpdateKind::WeightChanged {
                    edge: idx,
                    old_cost,
                    new_cost,
                })
            }
            GraphUpdate::WeightDelta { edge, delta } => {
                let idx = self.resolve_edge(&edge)?;
                let current = self
                    .edge(idx)
                    .ok_or(GraphError::UnknownEdge(edge.clone()))?
                    .weight;
                let next = current + delta;
                if !next.is_finite() || next <= 0.0 {
                    return Err(GraphError::InvalidWeight(next));
                }
                self.apply_update(GraphUpdate::WeightSet { edge, weight: next })
            }
            GraphUpdate::AddHyperedge(spec) => {
                let idx = self.add_hyperedge(spec)?;
                Ok(UpdateKind::EdgeAdded { edge: idx })
            }
            GraphUpdate::RemoveHyperedge { edge } => {
                let idx = self.resolve_edge(&edge)?;
                let removed = self.remove_hyperedge(idx)?;
                Ok(UpdateKind::EdgeRemoved {
                    edge: idx,
                    record: removed,
                })
            }
            GraphUpdate::ObserveEdge {
                from,
                to,
                edge_type,
            } => {
                let from = self.resolve_node(&from)?;
                let to = self.resolve_node(&to)?;
                self.find_or_promote_edge(from, to, edge_type)
            }
        }
    }

    /// Locate the pairwise projected edge `from → to` of the given type,
    /// creating it as `Inferred` if absent; increment its observation count
    /// and promote provenance monotonically (`Observed` once the count
    /// reaches the configured threshold). The scalar weight is recomputed
    /// from the tables whenever provenance changes.
    pub fn find_or_promote_edge(
        &mut self,
        from: NodeIdx,
        to: NodeIdx,
        edge_type: EdgeType,
    ) -> Result<UpdateKind> {
        self.check_writable()?;
        let existing = self.source_of[from.index()]
            .iter()
            .copied()
            .find(|&e| {
                self.edge(e).is_some_and(|he| {
                    he.edge_type == edge_type
                        && he.sources.len() == 1
                        && he.targets.len() == 1
                        && he.sources.contains(&from)
                        && he.targets.contains(&to)
                })
            });

        if let Some(idx) = existing {
            self.version += 1;
            let floor = self.cost_floor;
            let threshold = self.observed_threshold;
            let version = self.version;
            let he = self.edges[idx.index()]
                .as_mut()
                .ok_or(GraphError::UnknownEdge(idx.to_string()))?;
            let old_cost = 1.0 / he.weight.max(floor);
            he.observed_count += 1;
            let next_source = if he.observed_count >= threshold {
                EdgeSource::Observed
            } else {
                // First observation lifts a template edge to inferred.
                EdgeSource::Inferred
            };
            let promoted = next_source > he.edge_source;
            if promoted {
                he.edge_source = next_source;
                he.weight = derived_weight(he.edge_type, he.edge_source);
            }
            he.version = version;
            let new_cost = 1.0 / he.weight.max(floor);
            Ok(UpdateKind::EdgeObserved {
                edge: idx,
                created: false,
                promoted,
                old_cost,
                new_cost,
            })
        } else {
            let from_id = self.nodes[from.index()].id.clone();
            let to_id = self.nodes[to.index()].id.clone();
            let edge_id = format!("{from_id}->{to_id}:{edge_type}");
            let idx = self.add_hyperedge(HyperedgeSpec::pairwise(
                edge_id,
                from_id,
                to_id,
                edge_type,
                EdgeSource::Inferred,
            ))?;
            let cost = {
                let he = self.edge(idx).ok_or(GraphError::UnknownEdge(idx.to_string()))?;
                self.cost(he)
            };
            let he = self.edges[idx.index()]
                .as_mut()
                .ok_or(GraphError::UnknownEdge(idx.to_string()))?;
            he.observed_count = 1;
            Ok(UpdateKind::EdgeObserved {
                edge: idx,
                created: true,
                promoted: false,
                old_cost: cost,
                new_cost: cost,
            })
        }
    }

    // ── Projections ────────────────────────────────────────────────

    /// Pairwise weighted projection: every hyperedge contributes one
    /// directed `s → t` arc per (source, target) pair, carrying the edge
    /// weight. Used by Louvain, Adamic–Adar, and heat diffusion.
    pub fn project(&self) -> petgraph::graph::DiGraph<NodeIdx, f64> {
        let mut graph = petgraph::graph::DiGraph::with_capacity(self.nodes.len(), self.live_edges);
        let indices: Vec<_> = (0..self.nodes.len())
            .map(|i| graph.add_node(NodeIdx(i as u32)))
            .collect();
        for (_, he) in self.iter_edges() {
            for &s in &he.sources {
                for &t in &he.targets {
                    if s != t {
                        graph.add_edge(indices[s.index()], indices[t.index()], he.weight);
                    }
                }
            }
        }
        graph
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Export a lossless snapshot of the live graph.
    pub fn to_records(&self) -> (Vec<NodeRecord>, Vec<EdgeRecord>) {
        let node_records = self
            .iter_nodes()
            .map(|(_, n)| NodeRecord {
                id: n.id.clone(),
                kind: n.kind,
                embedding: n.embedding.clone(),
                parents: n
                    .parents
                    .iter()
                    .map(|&p| self.nodes[p.index()].id.clone())
                    .collect(),
                children: n
                    .children
                    .iter()
                    .map(|&c| self.nodes[c.index()].id.clone())
                    .collect(),
            })
            .collect();
        let edge_records = self
            .iter_edges()
            .map(|(_, he)| EdgeRecord {
                id: he.id.clone(),
                sources: he
                    .sources
                    .iter()
                    .map(|&s| self.nodes[s.index()].id.clone())
                    .collect(),
                targets: he
                    .targets
                    .iter()
                    .map(|&t| self.nodes[t.index()].id.clone())
                    .collect(),
                weight: he.weight,
                edge_type: he.edge_type,
                edge_source: he.edge_source,
                observed_count: he.observed_count,
                version: he.version,
                metadata: he.metadata.clone(),
            })
            .collect();
        (node_records, edge_records)
    }

    /// Rebuild a graph from snapshot records.
    pub fn from_records(
        cost_floor: f64,
        observed_threshold: u32,
        nodes: &[NodeRecord],
        edges: &[EdgeRecord],
    ) -> Result<Self> {
        let mut graph = Self::with_config(cost_floor, observed_threshold);
        for n in nodes {
            graph.add_node(n.id.clone(), n.kind, n.embedding.clone())?;
        }
        for n in nodes {
            let child = graph.resolve_node(&n.id)?;
            for p in &n.parents {
                let parent = graph.resolve_node(p)?;
                graph.link_hierarchy(parent, child)?;
            }
        }
        let mut max_version = 0u64;
        for e in edges {
            let idx = graph.add_hyperedge(HyperedgeSpec {
                id: e.id.clone(),
                sources: e.sources.clone(),
                targets: e.targets.clone(),
                edge_type: e.edge_type,
                edge_source: e.edge_source,
                weight: Some(e.weight),
                metadata: e.metadata.clone(),
            })?;
            let he = graph.edges[idx.index()]
                .as_mut()
                .ok_or_else(|| GraphError::UnknownEdge(e.id.clone()))?;
            he.observed_count = e.observed_count;
            he.version = e.version;
            max_version = max_version.max(e.version);
        }
        graph.version = graph.version.max(max_version);
        Ok(graph)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
