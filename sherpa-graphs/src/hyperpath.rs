//! Dynamic shortest hyperpaths (DR-DSP).
//!
//! A hyperedge is traversed by activating its entire source set before any
//! target is reached, so a relaxation step costs
//! `cost(he) + max_{s ∈ sources} dist(s)`. With single-source edges this
//! degenerates to Dijkstra. [`DynamicSssp`] keeps a single-source solution
//! alive across graph mutations: weight decreases re-relax locally from the
//! affected targets, weight increases/removals invalidate the dependent
//! subtree and reconverge through the heap.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Instant;

use crate::hypergraph::{EdgeIdx, Hypergraph, NodeIdx, UpdateKind};
use crate::{GraphError, Result};

/// Outcome of a hyperpath query. Disconnection is not an error: `found` is
/// false and `total_weight` is `+∞`.
#[derive(Debug, Clone, PartialEq)]
pub struct HyperpathResult {
    pub found: bool,
    /// Visited nodes from source to target, inclusive.
    pub node_sequence: Vec<NodeIdx>,
    /// Hyperedges traversed, in order.
    pub hyperedges_used: Vec<EdgeIdx>,
    /// Sum of traversal costs along the path.
    pub total_weight: f64,
}

impl HyperpathResult {
    fn not_found() -> Self {
        Self {
            found: false,
            node_sequence: Vec::new(),
            hyperedges_used: Vec::new(),
            total_weight: f64::INFINITY,
        }
    }

    fn trivial(node: NodeIdx) -> Self {
        Self {
            found: true,
            node_sequence: vec![node],
            hyperedges_used: Vec::new(),
            total_weight: 0.0,
        }
    }
}

// Min-heap entry ordered by tentative distance.
#[derive(Debug, PartialEq)]
struct HeapEntry {
    dist: f64,
    node: NodeIdx,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    if deadline.is_some_and(|d| Instant::now() >= d) {
        return Err(GraphError::DeadlineExceeded);
    }
    Ok(())
}

/// Shortest hyperpath between two nodes; terminates as soon as the target
/// is settled.
pub fn shortest_hyperpath(
    graph: &Hypergraph,
    source: NodeIdx,
    target: NodeIdx,
    deadline: Option<Instant>,
) -> Result<HyperpathResult> {
    if source == target {
        return Ok(HyperpathResult::trivial(source));
    }

    let mut dist: HashMap<NodeIdx, f64> = HashMap::new();
    let mut parent: HashMap<NodeIdx, EdgeIdx> = HashMap::new();
    let mut settled: HashSet<NodeIdx> = HashSet::new();
    let mut heap = BinaryHeap::new();

    dist.insert(source, 0.0);
    heap.push(HeapEntry {
        dist: 0.0,
        node: source,
    });

    while let Some(HeapEntry { dist: d, node }) = heap.pop() {
        check_deadline(deadline)?;
        if settled.contains(&node) {
            continue;
        }
        if dist.get(&node).is_some_and(|&cur| d > cur) {
            continue;
        }
        settled.insert(node);
        if node == target {
            return Ok(reconstruct(graph, &dist, &parent, source, target));
        }
        relax_outgoing(graph, node, &mut dist, &mut parent, &mut heap, |n| {
            settled.contains(&n)
        });
    }

    Ok(HyperpathResult::not_found())
}

/// Relax every hyperedge whose source set includes `node` and is fully
/// covered by `ready`. Pushes improved targets.
fn relax_outgoing<F: Fn(NodeIdx) -> bool>(
    graph: &Hypergraph,
    node: NodeIdx,
    dist: &mut HashMap<NodeIdx, f64>,
    parent: &mut HashMap<NodeIdx, EdgeIdx>,
    heap: &mut BinaryHeap<HeapEntry>,
    ready: F,
) {
    for (eidx, he) in graph.edges_from(node) {
        if !he.sources.iter().all(|&s| ready(s)) {
            continue;
        }
        let Some(base) = he
            .sources
            .iter()
            .map(|s| dist.get(s).copied())
            .try_fold(0.0_f64, |acc, d| d.map(|d| acc.max(d)))
        else {
            continue;
        };
        let next = base + graph.cost(he);
        for &t in &he.targets {
            if dist.get(&t).is_none_or(|&cur| next < cur) {
                dist.insert(t, next);
                parent.insert(t, eidx);
                heap.push(HeapEntry {
                    dist: next,
                    node: t,
                });
            }
        }
    }
}

/// Walk parent hyperedges back from the target; at each multi-source edge
/// the bottleneck source (max distance) is the predecessor.
fn reconstruct(
    graph: &Hypergraph,
    dist: &HashMap<NodeIdx, f64>,
    parent: &HashMap<NodeIdx, EdgeIdx>,
    source: NodeIdx,
    target: NodeIdx,
) -> HyperpathResult {
    let Some(&total) = dist.get(&target) else {
        return HyperpathResult::not_found();
    };

    let mut nodes = vec![target];
    let mut edges = Vec::new();
    let mut cursor = target;
    while cursor != source {
        let Some(&eidx) = parent.get(&cursor) else {
            return HyperpathResult::not_found();
        };
        let Some(he) = graph.edge(eidx) else {
            return HyperpathResult::not_found();
        };
        edges.push(eidx);
        let predecessor = he
            .sources
            .iter()
            .copied()
            .max_by(|a, b| {
                let da = dist.get(a).copied().unwrap_or(f64::INFINITY);
                let db = dist.get(b).copied().unwrap_or(f64::INFINITY);
                da.total_cmp(&db)
            })
            .unwrap_or(source);
        nodes.push(predecessor);
        cursor = predecessor;
    }
    nodes.reverse();
    edges.reverse();

    HyperpathResult {
        found: true,
        node_sequence: nodes,
        hyperedges_used: edges,
        total_weight: total,
    }
}

// ── Dynamic SSSP ───────────────────────────────────────────────────

/// Single-source shortest hyperpath distances maintained under incremental
/// graph updates.
#[derive(Debug, Clone)]
pub struct DynamicSssp {
    source: NodeIdx,
    dist: HashMap<NodeIdx, f64>,
    parent: HashMap<NodeIdx, EdgeIdx>,
}

impl DynamicSssp {
    /// Full SSSP run from `source`.
    pub fn compute(
        graph: &Hypergraph,
        source: NodeIdx,
        deadline: Option<Instant>,
    ) -> Result<Self> {
        let mut state = Self {
            source,
            dist: HashMap::from([(source, 0.0)]),
            parent: HashMap::new(),
        };
        let mut heap = BinaryHeap::new();
        heap.push(HeapEntry {
            dist: 0.0,
            node: source,
        });
        state.converge(graph, heap, deadline)?;
        Ok(state)
    }

    pub fn source(&self) -> NodeIdx {
        self.source
    }

    pub fn distance(&self, node: NodeIdx) -> Option<f64> {
        self.dist.get(&node).copied()
    }

    /// Every reachable node's distance.
    pub fn distances(&self) -> &HashMap<NodeIdx, f64> {
        &self.dist
    }

    /// Parent hyperedge that finalized each reachable node.
    pub fn parent_edges(&self) -> &HashMap<NodeIdx, EdgeIdx> {
        &self.parent
    }

    /// Reconstruct the path from the source to `target`.
    pub fn path_to(&self, graph: &Hypergraph, target: NodeIdx) -> HyperpathResult {
        if target == self.source {
            return HyperpathResult::trivial(self.source);
        }
        reconstruct(graph, &self.dist, &self.parent, self.source, target)
    }

    /// Fold one graph update into the solution.
    pub fn apply(
        &mut self,
        graph: &Hypergraph,
        update: &UpdateKind,
        deadline: Option<Instant>,
    ) -> Result<()> {
        match update {
            UpdateKind::WeightChanged {
                edge,
                old_cost,
                new_cost,
            } => {
                if new_cost < old_cost {
                    self.relax_from_edge(graph, *edge, deadline)
                } else if new_cost > old_cost {
                    self.invalidate_and_reconverge(graph, *edge, deadline)
                } else {
                    Ok(())
                }
            }
            UpdateKind::EdgeAdded { edge } => self.relax_from_edge(graph, *edge, deadline),
            UpdateKind::EdgeRemoved { edge, .. } => {
                self.invalidate_and_reconverge(graph, *edge, deadline)
            }
            UpdateKind::EdgeObserved {
                edge,
                created,
                old_cost,
                new_cost,
                ..
            } => {
                if *created {
                    self.relax_from_edge(graph, *edge, deadline)
                } else if new_cost < old_cost {
                    self.relax_from_edge(graph, *edge, deadline)
                } else if new_cost > old_cost {
                    self.invalidate_and_reconverge(graph, *edge, deadline)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Weight decrease / new edge: a localized re-relaxation from the
    /// edge's targets suffices — improvements propagate through the heap.
    fn relax_from_edge(
        &mut self,
        graph: &Hypergraph,
        edge: EdgeIdx,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let Some(he) = graph.edge(edge) else {
            return Ok(());
        };
        let Some(base) = he
            .sources
            .iter()
            .map(|s| self.dist.get(s).copied())
            .try_fold(0.0_f64, |acc, d| d.map(|d| acc.max(d)))
        else {
            // Some source unreachable: the edge cannot fire yet.
            return Ok(());
        };
        let next = base + graph.cost(he);
        let mut heap = BinaryHeap::new();
        for &t in &he.targets {
            if self.dist.get(&t).is_none_or(|&cur| next < cur) {
                self.dist.insert(t, next);
                self.parent.insert(t, edge);
                heap.push(HeapEntry {
                    dist: next,
                    node: t,
                });
            }
        }
        self.converge(graph, heap, deadline)
    }

    /// Weight increase / removal: drop every node whose distance flows
    /// through the affected edge, then rebuild the frontier from edges
    /// whose sources survived and reconverge.
    fn invalidate_and_reconverge(
        &mut self,
        graph: &Hypergraph,
        edge: EdgeIdx,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let mut invalid: HashSet<NodeIdx> = self
            .parent
            .iter()
            .filter(|&(_, &e)| e == edge)
            .map(|(&n, _)| n)
            .collect();
        if invalid.is_empty() {
            // Edge was not on any shortest path; a cost increase cannot
            // change distances, but a decrease path is handled elsewhere.
            return Ok(());
        }

        // Transitive closure: a node is tainted when any source of its
        // parent edge is tainted (conservative over the bottleneck max).
        loop {
            let mut grew = false;
            for (&node, &pedge) in &self.parent {
                if invalid.contains(&node) {
                    continue;
                }
                let Some(he) = graph.edge(pedge) else {
                    invalid.insert(node);
                    grew = true;
                    continue;
                };
                if he.sources.iter().any(|s| invalid.contains(s)) {
                    invalid.insert(node);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }
        invalid.remove(&self.source);

        for node in &invalid {
            self.dist.remove(node);
            self.parent.remove(node);
        }

        // Seed tentative labels for the invalidated set from surviving
        // in-edges, then let the heap settle everything.
        let mut heap = BinaryHeap::new();
        for &node in &invalid {
            check_deadline(deadline)?;
            let mut best: Option<(f64, EdgeIdx)> = None;
            for (eidx, he) in graph.edges_into(node) {
                let Some(base) = he
                    .sources
                    .iter()
                    .map(|s| self.dist.get(s).copied())
                    .try_fold(0.0_f64, |acc, d| d.map(|d| acc.max(d)))
                else {
                    continue;
                };
                let cand = base + graph.cost(he);
                if best.is_none_or(|(b, _)| cand < b) {
                    best = Some((cand, eidx));
                }
            }
            if let Some((d, e)) = best {
                self.dist.insert(node, d);
                self.parent.insert(node, e);
                heap.push(HeapEntry { dist: d, node });
            }
        }
        self.converge(graph, heap, deadline)
    }

    /// Label-correcting convergence: whenever a node improves it is
    /// re-pushed, and every pop re-examines its outgoing hyperedges, so the
    /// bottleneck max always settles to the fixed point.
    fn converge(
        &mut self,
        graph: &Hypergraph,
        mut heap: BinaryHeap<HeapEntry>,
        deadline: Option<Instant>,
    ) -> Result<()> {
        while let Some(HeapEntry { dist: d, node }) = heap.pop() {
            check_deadline(deadline)?;
            if self.dist.get(&node).is_none_or(|&cur| d > cur) {
                continue;
            }
            let dist = &mut self.dist;
            let parent = &mut self.parent;
            for (eidx, he) in graph.edges_from(node) {
                let Some(base) = he
                    .sources
                    .iter()
                    .map(|s| dist.get(s).copied())
                    .try_fold(0.0_f64, |acc, dd| dd.map(|dd| acc.max(dd)))
                else {
                    continue;
                };
                let next = base + graph.cost(he);
                for &t in &he.targets {
                    if dist.get(&t).is_none_or(|&cur| next < cur) {
                        dist.insert(t, next);
                        parent.insert(t, eidx);
                        heap.push(HeapEntry {
                            dist: next,
                            node: t,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypergraph::{EdgeSource, EdgeType, GraphUpdate, HyperedgeSpec, NodeKind};

    /// The checkout-flow fixture: six tools chained by sequence edges with
    /// derived weight 0.35 (sequence × inferred).
    fn checkout_graph() -> Hypergraph {
        let tools = [
            "db_get_cart",
            "inventory_check",
            "payment_validate",
            "payment_charge",
            "db_save_order",
            "email_confirm",
        ];
        let mut g = Hypergraph::new();
        for t in tools {
            g.add_node(t, NodeKind::Tool, vec![]).unwrap();
        }
        for pair in tools.windows(2) {
            g.add_hyperedge(HyperedgeSpec::pairwise(
                format!("{}->{}", pair[0], pair[1]),
                pair[0],
                pair[1],
                EdgeType::Sequence,
                EdgeSource::Inferred,
            ))
            .unwrap();
        }
        g
    }

    #[test]
    fn chain_path_in_order() {
        let g = checkout_graph();
        let src = g.resolve_node("db_get_cart").unwrap();
        let dst = g.resolve_node("email_confirm").unwrap();
        let path = shortest_hyperpath(&g, src, dst, None).unwrap();

        assert!(path.found);
        assert_eq!(path.node_sequence.len(), 6);
        assert_eq!(path.hyperedges_used.len(), 5);
        let names: Vec<_> = path
            .node_sequence
            .iter()
            .map(|&n| g.node(n).id.as_str())
            .collect();
        assert_eq!(
            names,
            [
                "db_get_cart",
                "inventory_check",
                "payment_validate",
                "payment_charge",
                "db_save_order",
                "email_confirm"
            ]
        );
        assert!((path.total_weight - 5.0 / 0.35).abs() < 1e-9);
    }

    #[test]
    fn rescoring_path_matches_total() {
        let g = checkout_graph();
        let src = g.resolve_node("db_get_cart").unwrap();
        let dst = g.resolve_node("db_save_order").unwrap();
        let path = shortest_hyperpath(&g, src, dst, None).unwrap();
        let rescored: f64 = path
            .hyperedges_used
            .iter()
            .map(|&e| g.cost(g.edge(e).unwrap()))
            .sum();
        assert!((rescored - path.total_weight).abs() < 1e-9);
    }

    #[test]
    fn trivial_self_path() {
        let g = checkout_graph();
        let a = g.resolve_node("db_get_cart").unwrap();
        let path = shortest_hyperpath(&g, a, a, None).unwrap();
        assert!(path.found);
        assert_eq!(path.node_sequence, vec![a]);
        assert!(path.hyperedges_used.is_empty());
        assert_eq!(path.total_weight, 0.0);
    }

    #[test]
    fn disconnected_is_not_found() {
        let mut g = checkout_graph();
        g.add_node("island", NodeKind::Tool, vec![]).unwrap();
        let src = g.resolve_node("db_get_cart").unwrap();
        let dst = g.resolve_node("island").unwrap();
        let path = shortest_hyperpath(&g, src, dst, None).unwrap();
        assert!(!path.found);
        assert!(path.total_weight.is_infinite());
    }

    #[test]
    fn weight_increase_reconverges() {
        // Drop one link's weight to 0.2: same route, total rises by
        // 1/0.2 − 1/0.35 on that hop.
        let mut g = checkout_graph();
        let src = g.resolve_node("db_get_cart").unwrap();
        let dst = g.resolve_node("email_confirm").unwrap();
        let before = shortest_hyperpath(&g, src, dst, None).unwrap();

        let mut sssp = DynamicSssp::compute(&g, src, None).unwrap();
        let kind = g
            .apply_update(GraphUpdate::WeightSet {
                edge: "payment_validate->payment_charge".into(),
                weight: 0.2,
            })
            .unwrap();
        sssp.apply(&g, &kind, None).unwrap();

        let after = sssp.path_to(&g, dst);
        assert!(after.found);
        assert_eq!(after.node_sequence.len(), 6);
        let expected = before.total_weight + 1.0 / 0.2 - 1.0 / 0.35;
        assert!((after.total_weight - expected).abs() < 1e-9);

        // The incremental answer matches a fresh run.
        let fresh = shortest_hyperpath(&g, src, dst, None).unwrap();
        assert!((after.total_weight - fresh.total_weight).abs() < 1e-9);
    }

    #[test]
    fn weight_improvement_propagates_incrementally() {
        let mut g = checkout_graph();
        let src = g.resolve_node("db_get_cart").unwrap();
        let dst = g.resolve_node("email_confirm").unwrap();
        let mut sssp = DynamicSssp::compute(&g, src, None).unwrap();
        let before = sssp.distance(dst).unwrap();

        let kind = g
            .apply_update(GraphUpdate::WeightSet {
                edge: "db_get_cart->inventory_check".into(),
                weight: 5.0,
            })
            .unwrap();
        sssp.apply(&g, &kind, None).unwrap();

        let after = sssp.distance(dst).unwrap();
        assert!((before - after - (1.0 / 0.35 - 1.0 / 5.0)).abs() < 1e-9);
        let fresh = shortest_hyperpath(&g, src, dst, None).unwrap();
        assert!((after - fresh.total_weight).abs() < 1e-9);
    }

    #[test]
    fn alternative_edge_shortens_path() {
        // A direct 0.5-weight shortcut wins.
        let mut g = checkout_graph();
        let src = g.resolve_node("db_get_cart").unwrap();
        let dst = g.resolve_node("email_confirm").unwrap();

        let mut sssp = DynamicSssp::compute(&g, src, None).unwrap();
        let kind = g
            .apply_update(GraphUpdate::AddHyperedge(HyperedgeSpec {
                id: "fast_confirm".into(),
                sources: vec!["db_get_cart".into()],
                targets: vec!["email_confirm".into()],
                edge_type: EdgeType::Alternative,
                edge_source: EdgeSource::Inferred,
                weight: Some(0.5),
                metadata: HashMap::new(),
            }))
            .unwrap();
        sssp.apply(&g, &kind, None).unwrap();

        let path = sssp.path_to(&g, dst);
        assert!(path.found);
        assert_eq!(path.node_sequence, vec![src, dst]);
        assert!((path.total_weight - 2.0).abs() < 1e-9);
    }

    #[test]
    fn edge_removal_invalidates_subtree() {
        let mut g = checkout_graph();
        let src = g.resolve_node("db_get_cart").unwrap();
        let dst = g.resolve_node("email_confirm").unwrap();
        let mut sssp = DynamicSssp::compute(&g, src, None).unwrap();

        let kind = g
            .apply_update(GraphUpdate::RemoveHyperedge {
                edge: "payment_charge->db_save_order".into(),
            })
            .unwrap();
        sssp.apply(&g, &kind, None).unwrap();

        assert!(sssp.distance(dst).is_none());
        let path = sssp.path_to(&g, dst);
        assert!(!path.found);
        // Prefix is untouched.
        let pv = g.resolve_node("payment_validate").unwrap();
        assert!(sssp.distance(pv).is_some());
    }

    #[test]
    fn weight_decrease_never_increases_distance() {
        let mut g = checkout_graph();
        let src = g.resolve_node("db_get_cart").unwrap();
        let mut sssp = DynamicSssp::compute(&g, src, None).unwrap();
        let before: HashMap<NodeIdx, f64> = sssp.distances().clone();

        let kind = g
            .apply_update(GraphUpdate::WeightSet {
                edge: "inventory_check->payment_validate".into(),
                weight: 2.0,
            })
            .unwrap();
        sssp.apply(&g, &kind, None).unwrap();

        for (node, old) in before {
            let new = sssp.distance(node).expect("still reachable");
            assert!(new <= old + 1e-12, "distance increased after decrease");
        }
    }

    #[test]
    fn multi_source_edge_waits_for_all_sources() {
        // join requires both a and b: dist(join) = cost + max(dist(a), dist(b)).
        let mut g = Hypergraph::new();
        for id in ["start", "a", "b", "join"] {
            g.add_node(id, NodeKind::Tool, vec![]).unwrap();
        }
        g.add_hyperedge(HyperedgeSpec::pairwise(
            "start->a",
            "start",
            "a",
            EdgeType::Sequence,
            EdgeSource::Observed,
        ))
        .unwrap();
        // Slower branch to b.
        g.add_hyperedge(HyperedgeSpec {
            id: "start->b".into(),
            sources: vec!["start".into()],
            targets: vec!["b".into()],
            edge_type: EdgeType::Sequence,
            edge_source: EdgeSource::Observed,
            weight: Some(0.25),
            metadata: HashMap::new(),
        })
        .unwrap();
        g.add_hyperedge(HyperedgeSpec {
            id: "ab->join".into(),
            sources: vec!["a".into(), "b".into()],
            targets: vec!["join".into()],
            edge_type: EdgeType::Dependency,
            edge_source: EdgeSource::Observed,
            weight: None,
            metadata: HashMap::new(),
        })
        .unwrap();

        let src = g.resolve_node("start").unwrap();
        let join = g.resolve_node("join").unwrap();
        let path = shortest_hyperpath(&g, src, join, None).unwrap();
        assert!(path.found);
        // dist(a) = 1/0.5 = 2, dist(b) = 1/0.25 = 4, join = max + 1/1.0 = 5.
        assert!((path.total_weight - 5.0).abs() < 1e-9);
    }

    #[test]
    fn deadline_exceeded_surfaces() {
        let g = checkout_graph();
        let src = g.resolve_node("db_get_cart").unwrap();
        let dst = g.resolve_node("email_confirm").unwrap();
        let past = Instant::now() - std::time::Duration::from_secs(1);
        let err = shortest_hyperpath(&g, src, dst, Some(past)).unwrap_err();
        assert!(matches!(err, GraphError::DeadlineExceeded));
    }

    #[test]
    fn sssp_covers_all_reachable_nodes() {
        let g = checkout_graph();
        let src = g.resolve_node("db_get_cart").unwrap();
        let sssp = DynamicSssp::compute(&g, src, None).unwrap();
        assert_eq!(sssp.distances().len(), 6);
        // Every settled node except the source has a parent hyperedge.
        assert_eq!(sssp.parent_edges().len(), 5);
    }
}
