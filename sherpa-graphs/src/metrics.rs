// Neighbourhood metrics feeding the attention scorer: Adamic–Adar link
// affinity and co-occurrence counts.
#![allow(clippy::cast_precision_loss)]

use std::collections::{HashMap, HashSet};

use crate::hypergraph::{Hypergraph, NodeIdx};

/// Undirected neighbour sets over the pairwise projection.
fn neighbour_sets(graph: &Hypergraph) -> Vec<HashSet<NodeIdx>> {
    let mut sets: Vec<HashSet<NodeIdx>> = vec![HashSet::new(); graph.arena_len()];
    for (_, he) in graph.iter_edges() {
        for &s in &he.sources {
            for &t in &he.targets {
                if s != t {
                    sets[s.index()].insert(t);
                    sets[t.index()].insert(s);
                }
            }
        }
    }
    sets
}

/// Adamic–Adar affinity between two nodes: `Σ 1/ln(deg(z))` over common
/// neighbours `z`. Neighbours of degree ≤ 1 contribute nothing.
pub fn adamic_adar(graph: &Hypergraph, a: NodeIdx, b: NodeIdx) -> f64 {
    let sets = neighbour_sets(graph);
    adamic_adar_with(&sets, a, b)
}

/// Adamic–Adar against precomputed neighbour sets (for batch queries).
pub fn adamic_adar_with(sets: &[HashSet<NodeIdx>], a: NodeIdx, b: NodeIdx) -> f64 {
    let (sa, sb) = (&sets[a.index()], &sets[b.index()]);
    sa.intersection(sb)
        .map(|z| {
            let deg = sets[z.index()].len();
            if deg > 1 { 1.0 / (deg as f64).ln() } else { 0.0 }
        })
        .sum()
}

/// Precompute neighbour sets once for a batch of Adamic–Adar queries.
pub fn neighbourhoods(graph: &Hypergraph) -> Vec<HashSet<NodeIdx>> {
    neighbour_sets(graph)
}

/// How many hyperedges mention both nodes (either side). A raw
/// co-occurrence signal for the feature bundle.
pub fn co_occurrence(graph: &Hypergraph, a: NodeIdx, b: NodeIdx) -> u32 {
    let mut count = 0;
    for (_, he) in graph.iter_edges() {
        let mentions = |n: NodeIdx| he.sources.contains(&n) || he.targets.contains(&n);
        if mentions(a) && mentions(b) {
            count += 1;
        }
    }
    count
}

/// Co-occurrence of `candidate` with any of `context`, normalized by the
/// number of context nodes. Empty context yields 0.
pub fn context_co_occurrence(graph: &Hypergraph, candidate: NodeIdx, context: &[NodeIdx]) -> f64 {
    if context.is_empty() {
        return 0.0;
    }
    let total: u32 = context
        .iter()
        .map(|&c| co_occurrence(graph, candidate, c))
        .sum();
    f64::from(total) / context.len() as f64
}

/// Degree map over the projection (useful for telemetry).
pub fn degrees(graph: &Hypergraph) -> HashMap<NodeIdx, usize> {
    let sets = neighbour_sets(graph);
    graph
        .iter_nodes()
        .map(|(idx, _)| (idx, sets[idx.index()].len()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypergraph::{EdgeSource, EdgeType, HyperedgeSpec, NodeKind};

    fn pair(g: &mut Hypergraph, from: &str, to: &str) {
        g.add_hyperedge(HyperedgeSpec::pairwise(
            format!("{from}->{to}"),
            from,
            to,
            EdgeType::Sequence,
            EdgeSource::Observed,
        ))
        .unwrap();
    }

    #[test]
    fn adamic_adar_shared_hub() {
        let mut g = Hypergraph::new();
        for id in ["a", "b", "hub", "x", "y"] {
            g.add_node(id, NodeKind::Tool, vec![]).unwrap();
        }
        // a and b share hub; hub also touches x and y so ln(deg) is defined.
        pair(&mut g, "a", "hub");
        pair(&mut g, "b", "hub");
        pair(&mut g, "hub", "x");
        pair(&mut g, "hub", "y");

        let a = g.resolve_node("a").unwrap();
        let b = g.resolve_node("b").unwrap();
        let score = adamic_adar(&g, a, b);
        assert!((score - 1.0 / 4.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn adamic_adar_no_common_neighbours() {
        let mut g = Hypergraph::new();
        for id in ["a", "b", "c"] {
            g.add_node(id, NodeKind::Tool, vec![]).unwrap();
        }
        pair(&mut g, "a", "c");
        let a = g.resolve_node("a").unwrap();
        let b = g.resolve_node("b").unwrap();
        assert_eq!(adamic_adar(&g, a, b), 0.0);
    }

    #[test]
    fn co_occurrence_counts_shared_edges() {
        let mut g = Hypergraph::new();
        for id in ["a", "b", "c"] {
            g.add_node(id, NodeKind::Tool, vec![]).unwrap();
        }
        g.add_hyperedge(HyperedgeSpec {
            id: "multi".into(),
            sources: vec!["a".into()],
            targets: vec!["b".into(), "c".into()],
            edge_type: EdgeType::Contains,
            edge_source: EdgeSource::Observed,
            weight: None,
            metadata: HashMap::new(),
        })
        .unwrap();
        pair(&mut g, "a", "b");

        let a = g.resolve_node("a").unwrap();
        let b = g.resolve_node("b").unwrap();
        let c = g.resolve_node("c").unwrap();
        assert_eq!(co_occurrence(&g, a, b), 2);
        assert_eq!(co_occurrence(&g, a, c), 1);
        assert_eq!(co_occurrence(&g, b, c), 1);
    }

    #[test]
    fn context_co_occurrence_empty_context() {
        let mut g = Hypergraph::new();
        g.add_node("a", NodeKind::Tool, vec![]).unwrap();
        let a = g.resolve_node("a").unwrap();
        assert_eq!(context_co_occurrence(&g, a, &[]), 0.0);
    }
}
