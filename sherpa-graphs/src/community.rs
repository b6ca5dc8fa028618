// Louvain community detection over the pairwise projection.
//
// Multi-level: local-move sweeps reassign one vertex at a time using the
// detach-then-reattach modularity score, with per-community strengths
// maintained incrementally; once a sweep stops moving vertices the
// projection is coarsened by community and the sweep repeats one level up.
// Coarse vertices carry self-loop weight for the collapsed internal edges.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use std::collections::HashMap;

use petgraph::graph::DiGraph;
use tracing::debug;

use crate::hypergraph::{Hypergraph, NodeIdx};

const MAX_SWEEP_ROUNDS: usize = 16;
const MAX_LEVELS: usize = 8;
/// A reassignment must beat staying put by at least this much.
const MIN_GAIN: f64 = 1e-9;

/// Undirected weighted neighbour lists with parallel arcs merged.
/// `loops` holds collapsed intra-community weight on coarse levels.
struct Neighbourhood {
    links: Vec<Vec<(usize, f64)>>,
    loops: Vec<f64>,
    /// Weighted degree per vertex (self-loops count twice).
    strength: Vec<f64>,
    /// Total undirected edge weight.
    m: f64,
}

impl Neighbourhood {
    fn assemble(links: Vec<Vec<(usize, f64)>>, loops: Vec<f64>) -> Self {
        let strength = links
            .iter()
            .zip(&loops)
            .map(|(row, &own)| row.iter().map(|&(_, w)| w).sum::<f64>() + 2.0 * own)
            .collect();
        let half_links: f64 = links
            .iter()
            .enumerate()
            .map(|(v, row)| {
                row.iter()
                    .filter(|&&(u, _)| u > v)
                    .map(|&(_, w)| w)
                    .sum::<f64>()
            })
            .sum();
        let m = half_links + loops.iter().sum::<f64>();
        Self {
            links,
            loops,
            strength,
            m,
        }
    }

    /// Merge the directed projection into undirected neighbour lists.
    fn from_projection(proj: &DiGraph<NodeIdx, f64>) -> Self {
        let n = proj.node_count();
        let mut merged: Vec<HashMap<usize, f64>> = vec![HashMap::new(); n];
        for arc in proj.edge_indices() {
            let Some((a, b)) = proj.edge_endpoints(arc) else {
                continue;
            };
            let w = proj[arc];
            *merged[a.index()].entry(b.index()).or_default() += w;
            *merged[b.index()].entry(a.index()).or_default() += w;
        }
        let links = merged
            .into_iter()
            .map(|row| {
                let mut flat: Vec<(usize, f64)> = row.into_iter().collect();
                flat.sort_unstable_by_key(|&(u, _)| u);
                flat
            })
            .collect();
        let loops = vec![0.0; n];
        Self::assemble(links, loops)
    }

    fn len(&self) -> usize {
        self.links.len()
    }
}

/// One level of local moves. `labels` starts as the identity assignment;
/// returns how many reassignments happened in total.
fn sweep(net: &Neighbourhood, labels: &mut [usize]) -> usize {
    let n = net.len();
    let two_m_sq = 2.0 * net.m * net.m;

    // Per-community strength, updated as vertices move.
    let mut bucket: HashMap<usize, f64> = HashMap::new();
    for v in 0..n {
        *bucket.entry(labels[v]).or_default() += net.strength[v];
    }

    let mut total_moves = 0;
    for round in 0..MAX_SWEEP_ROUNDS {
        let mut moves = 0;
        for v in 0..n {
            if net.links[v].is_empty() {
                continue;
            }
            let home = labels[v];

            // Link weight from v into each adjacent community.
            let mut attached: HashMap<usize, f64> = HashMap::new();
            for &(u, w) in &net.links[v] {
                *attached.entry(labels[u]).or_default() += w;
            }

            // Detach v, then score home and every neighbour community on
            // equal footing: score(C) = w(v,C)/m − k_v·Σ_tot(C)/(2m²).
            *bucket.entry(home).or_default() -= net.strength[v];

            let score = |community: usize, link: f64| {
                link / net.m
                    - net.strength[v] * bucket.get(&community).copied().unwrap_or(0.0)
                        / two_m_sq
            };

            let mut dest = home;
            let mut best = score(home, attached.get(&home).copied().unwrap_or(0.0));
            for (&candidate, &link) in &attached {
                if candidate == home {
                    continue;
                }
                let s = score(candidate, link);
                if s > best + MIN_GAIN {
                    best = s;
                    dest = candidate;
                }
            }

            *bucket.entry(dest).or_default() += net.strength[v];
            if dest != home {
                labels[v] = dest;
                moves += 1;
            }
        }
        total_moves += moves;
        if moves == 0 {
            debug!(round, total_moves, "Louvain sweep settled");
            break;
        }
    }
    total_moves
}

/// Collapse each community into one coarse vertex. Returns the coarse
/// neighbourhood and the per-vertex dense community id.
fn coarsen(net: &Neighbourhood, labels: &[usize]) -> (Neighbourhood, Vec<usize>) {
    let mut dense: HashMap<usize, usize> = HashMap::new();
    let mut compact = vec![0usize; labels.len()];
    for (v, &label) in labels.iter().enumerate() {
        let fresh = dense.len();
        compact[v] = *dense.entry(label).or_insert(fresh);
    }
    let k = dense.len();

    let mut merged: Vec<HashMap<usize, f64>> = vec![HashMap::new(); k];
    let mut loops = vec![0.0; k];
    for (v, row) in net.links.iter().enumerate() {
        let cv = compact[v];
        loops[cv] += net.loops[v];
        for &(u, w) in row {
            // Each undirected pair is stored twice; fold it once.
            if u < v {
                continue;
            }
            let cu = compact[u];
            if cu == cv {
                loops[cv] += w;
            } else {
                *merged[cv].entry(cu).or_default() += w;
                *merged[cu].entry(cv).or_default() += w;
            }
        }
    }
    let links = merged
        .into_iter()
        .map(|row| {
            let mut flat: Vec<(usize, f64)> = row.into_iter().collect();
            flat.sort_unstable_by_key(|&(u, _)| u);
            flat
        })
        .collect();

    (Neighbourhood::assemble(links, loops), compact)
}

/// Louvain over the weighted pairwise projection. Returns `node →
/// community id` with ids contiguous from 0 over the live nodes.
pub fn louvain_communities(graph: &Hypergraph) -> HashMap<NodeIdx, u32> {
    let proj = graph.project();
    let mut net = Neighbourhood::from_projection(&proj);

    if net.m <= 0.0 {
        // Nothing to optimise without edges: every live node stands alone.
        return graph
            .iter_nodes()
            .enumerate()
            .map(|(i, (idx, _))| (idx, i as u32))
            .collect();
    }

    // Tracks where each original projection vertex sits at the current
    // level; composed with every coarsening.
    let mut membership: Vec<usize> = (0..net.len()).collect();

    for level in 0..MAX_LEVELS {
        let mut labels: Vec<usize> = (0..net.len()).collect();
        if sweep(&net, &mut labels) == 0 {
            break;
        }
        let (coarse, compact) = coarsen(&net, &labels);
        for slot in &mut membership {
            *slot = compact[*slot];
        }
        let shrunk = coarse.len() < net.len();
        net = coarse;
        debug!(level, vertices = net.len(), "Louvain level coarsened");
        if !shrunk {
            break;
        }
    }

    // Public ids: contiguous from 0, in live-node order.
    let mut public: HashMap<usize, u32> = HashMap::new();
    graph
        .iter_nodes()
        .map(|(idx, _)| {
            let fresh = public.len() as u32;
            let id = *public.entry(membership[idx.index()]).or_insert(fresh);
            (idx, id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypergraph::{EdgeSource, EdgeType, HyperedgeSpec, NodeKind};

    fn add_pair(g: &mut Hypergraph, from: &str, to: &str) {
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
    fn empty_graph() {
        let g = Hypergraph::new();
        assert!(louvain_communities(&g).is_empty());
    }

    #[test]
    fn isolated_nodes_get_distinct_communities() {
        let mut g = Hypergraph::new();
        for id in ["a", "b", "c"] {
            g.add_node(id, NodeKind::Tool, vec![]).unwrap();
        }
        let comms = louvain_communities(&g);
        let unique: std::collections::HashSet<_> = comms.values().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn two_cliques_separate() {
        let mut g = Hypergraph::new();
        for id in ["a1", "a2", "a3", "b1", "b2", "b3"] {
            g.add_node(id, NodeKind::Tool, vec![]).unwrap();
        }
        // Dense triangle in each group, single bridge between them.
        for (x, y) in [("a1", "a2"), ("a2", "a3"), ("a3", "a1")] {
            add_pair(&mut g, x, y);
        }
        for (x, y) in [("b1", "b2"), ("b2", "b3"), ("b3", "b1")] {
            add_pair(&mut g, x, y);
        }
        add_pair(&mut g, "a1", "b1");

        let comms = louvain_communities(&g);
        let a = [
            comms[&g.resolve_node("a1").unwrap()],
            comms[&g.resolve_node("a2").unwrap()],
            comms[&g.resolve_node("a3").unwrap()],
        ];
        let b = [
            comms[&g.resolve_node("b1").unwrap()],
            comms[&g.resolve_node("b2").unwrap()],
            comms[&g.resolve_node("b3").unwrap()],
        ];
        assert!(a.iter().all(|&c| c == a[0]), "a-clique should cohere");
        assert!(b.iter().all(|&c| c == b[0]), "b-clique should cohere");
        assert_ne!(a[0], b[0], "cliques should split");
    }

    #[test]
    fn star_collapses_into_one_community() {
        let mut g = Hypergraph::new();
        for id in ["hub", "s1", "s2", "s3", "s4"] {
            g.add_node(id, NodeKind::Tool, vec![]).unwrap();
        }
        for spoke in ["s1", "s2", "s3", "s4"] {
            add_pair(&mut g, "hub", spoke);
        }
        let comms = louvain_communities(&g);
        let hub = comms[&g.resolve_node("hub").unwrap()];
        for spoke in ["s1", "s2", "s3", "s4"] {
            assert_eq!(comms[&g.resolve_node(spoke).unwrap()], hub);
        }
    }

    #[test]
    fn parallel_arcs_merge_instead_of_double_counting() {
        // Two hyperedges over the same pair behave like one heavier link:
        // the pair still coheres and the bridge still splits.
        let mut g = Hypergraph::new();
        for id in ["x1", "x2", "y1", "y2"] {
            g.add_node(id, NodeKind::Tool, vec![]).unwrap();
        }
        add_pair(&mut g, "x1", "x2");
        g.add_hyperedge(HyperedgeSpec::pairwise(
            "x1->x2:again",
            "x1",
            "x2",
            EdgeType::Dependency,
            EdgeSource::Observed,
        ))
        .unwrap();
        add_pair(&mut g, "y1", "y2");
        add_pair(&mut g, "x2", "y1");

        let comms = louvain_communities(&g);
        assert_eq!(
            comms[&g.resolve_node("x1").unwrap()],
            comms[&g.resolve_node("x2").unwrap()]
        );
        assert_eq!(
            comms[&g.resolve_node("y1").unwrap()],
            comms[&g.resolve_node("y2").unwrap()]
        );
        assert_ne!(
            comms[&g.resolve_node("x1").unwrap()],
            comms[&g.resolve_node("y1").unwrap()]
        );
    }

    #[test]
    fn community_ids_contiguous() {
        let mut g = Hypergraph::new();
        for id in ["a", "b", "c", "d"] {
            g.add_node(id, NodeKind::Tool, vec![]).unwrap();
        }
        add_pair(&mut g, "a", "b");
        add_pair(&mut g, "c", "d");
        let comms = louvain_communities(&g);
        let mut ids: Vec<_> = comms.values().copied().collect();
        ids.sort_unstable();
        ids.dedup();
        for (expect, got) in ids.iter().enumerate() {
            assert_eq!(*got, expect as u32);
        }
    }
}
