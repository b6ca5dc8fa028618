// PageRank over the node × hyperedge bipartite projection.
//
// Graph algorithms intentionally cast int↔float (precision loss acceptable
// for metrics).
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless
)]

use std::collections::HashMap;

use tracing::debug;

use crate::hypergraph::{Hypergraph, NodeIdx};

/// Configuration for the PageRank power iteration.
#[derive(Debug, Clone)]
pub struct PageRankConfig {
    pub damping: f64,
    pub max_iterations: u32,
    pub tolerance: f64,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

/// PageRank on the bipartite projection: mass flows node → hyperedge for
/// every edge the node sources, and hyperedge → node for every target,
/// uniformly in both hops. Returns per-node scores summing to ~1.
pub fn pagerank(graph: &Hypergraph, config: &PageRankConfig) -> HashMap<NodeIdx, f64> {
    let n = graph.arena_len();
    let m = graph.edge_count();
    if graph.node_count() == 0 {
        return HashMap::new();
    }

    // Bipartite vertex set: nodes occupy [0, n), hyperedges [n, n + m).
    let edge_slots: Vec<_> = graph.iter_edges().map(|(idx, _)| idx).collect();
    let edge_pos: HashMap<_, _> = edge_slots
        .iter()
        .enumerate()
        .map(|(pos, &idx)| (idx, n + pos))
        .collect();

    let total = n + m;
    let mut out: Vec<Vec<usize>> = vec![Vec::new(); total];
    for (eidx, he) in graph.iter_edges() {
        let epos = edge_pos[&eidx];
        for &s in &he.sources {
            out[s.index()].push(epos);
        }
        for &t in &he.targets {
            out[epos].push(t.index());
        }
    }

    let mut rank = vec![1.0 / total as f64; total];
    let base = (1.0 - config.damping) / total as f64;

    for iteration in 0..config.max_iterations {
        let mut next = vec![base; total];

        // Dangling vertices spread their mass uniformly.
        let mut dangling = 0.0;
        for (v, targets) in out.iter().enumerate() {
            if targets.is_empty() {
                dangling += rank[v];
            } else {
                let share = config.damping * rank[v] / targets.len() as f64;
                for &t in targets {
                    next[t] += share;
                }
            }
        }
        if dangling > 0.0 {
            let share = config.damping * dangling / total as f64;
            for r in &mut next {
                *r += share;
            }
        }

        let diff: f64 = next
            .iter()
            .zip(rank.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        rank = next;
        if diff < config.tolerance {
            debug!(iteration, diff, "PageRank converged");
            break;
        }
    }

    // Keep the live-node half, renormalized so node scores sum to 1.
    let node_mass: f64 = graph.iter_nodes().map(|(idx, _)| rank[idx.index()]).sum();
    let scale = if node_mass > 0.0 { 1.0 / node_mass } else { 1.0 };
    graph
        .iter_nodes()
        .map(|(idx, _)| (idx, rank[idx.index()] * scale))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypergraph::{EdgeSource, EdgeType, HyperedgeSpec, NodeKind};

    fn chain(ids: &[&str]) -> Hypergraph {
        let mut g = Hypergraph::new();
        for id in ids {
            g.add_node(*id, NodeKind::Tool, vec![]).unwrap();
        }
        for pair in ids.windows(2) {
            g.add_hyperedge(HyperedgeSpec::pairwise(
                format!("{}->{}", pair[0], pair[1]),
                pair[0],
                pair[1],
                EdgeType::Sequence,
                EdgeSource::Observed,
            ))
            .unwrap();
        }
        g
    }

    #[test]
    fn empty_graph_yields_empty() {
        let g = Hypergraph::new();
        assert!(pagerank(&g, &PageRankConfig::default()).is_empty());
    }

    #[test]
    fn scores_sum_to_one() {
        let g = chain(&["a", "b", "c", "d"]);
        let scores = pagerank(&g, &PageRankConfig::default());
        let sum: f64 = scores.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sink_of_chain_ranks_highest() {
        let g = chain(&["a", "b", "c"]);
        let scores = pagerank(&g, &PageRankConfig::default());
        let a = scores[&g.resolve_node("a").unwrap()];
        let c = scores[&g.resolve_node("c").unwrap()];
        assert!(c > a, "chain sink should accumulate rank: {c} vs {a}");
    }

    #[test]
    fn hub_target_outranks_leaf() {
        // Three tools all feed "hub" through one fan-in hyperedge each.
        let mut g = Hypergraph::new();
        for id in ["a", "b", "c", "hub", "leaf"] {
            g.add_node(id, NodeKind::Tool, vec![]).unwrap();
        }
        for src in ["a", "b", "c"] {
            g.add_hyperedge(HyperedgeSpec::pairwise(
                format!("{src}->hub"),
                src,
                "hub",
                EdgeType::Dependency,
                EdgeSource::Observed,
            ))
            .unwrap();
        }
        g.add_hyperedge(HyperedgeSpec::pairwise(
            "a->leaf",
            "a",
            "leaf",
            EdgeType::Dependency,
            EdgeSource::Observed,
        ))
        .unwrap();

        let scores = pagerank(&g, &PageRankConfig::default());
        let hub = scores[&g.resolve_node("hub").unwrap()];
        let leaf = scores[&g.resolve_node("leaf").unwrap()];
        assert!(hub > leaf);
    }
}
