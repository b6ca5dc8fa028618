// Spectral clustering of the tool × capability bipartite structure.
//
// Builds the symmetric normalized Laplacian of the bipartite adjacency
// (tools on one side, capabilities/meta-capabilities on the other),
// extracts the eigenvectors of the bottom-k non-zero eigenvalues with a
// Jacobi eigensolver, and clusters the spectral embedding rows with
// seeded k-means. Labels are stable: clusters sorted by size descending.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::hypergraph::{EdgeType, Hypergraph, NodeIdx, NodeKind};

/// Configuration for spectral clustering.
#[derive(Debug, Clone)]
pub struct SpectralConfig {
    /// Number of clusters.
    pub k: usize,
    /// Jacobi sweep limit.
    pub max_sweeps: usize,
    /// k-means iteration limit.
    pub max_kmeans_iters: usize,
    /// Seed for k-means++ initialization (stable output across runs).
    pub seed: u64,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            k: 4,
            max_sweeps: 50,
            max_kmeans_iters: 100,
            seed: 42,
        }
    }
}

/// Cluster nodes by the spectral embedding of the bipartite adjacency.
/// Returns `node → cluster id` with id 0 the largest cluster. Nodes with no
/// bipartite incidence all land in one cluster.
pub fn spectral_clusters(graph: &Hypergraph, config: &SpectralConfig) -> HashMap<NodeIdx, u32> {
    let n = graph.arena_len();
    if graph.node_count() == 0 || config.k == 0 {
        return HashMap::new();
    }
    let k = config.k.min(graph.node_count());

    // Bipartite adjacency: tool ↔ capability incidence from hierarchy links
    // and Contains edges.
    let mut adj = vec![vec![0.0_f64; n]; n];
    let mut connect = |a: NodeIdx, b: NodeIdx, w: f64| {
        adj[a.index()][b.index()] += w;
        adj[b.index()][a.index()] += w;
    };
    for (idx, node) in graph.iter_nodes() {
        if node.kind == NodeKind::Tool {
            continue;
        }
        for &child in &node.children {
            connect(idx, child, 1.0);
        }
    }
    for (_, he) in graph.iter_edges() {
        if he.edge_type != EdgeType::Contains {
            continue;
        }
        for &s in &he.sources {
            for &t in &he.targets {
                let cross = graph.node(s).kind != graph.node(t).kind;
                if s != t && cross {
                    connect(s, t, he.weight);
                }
            }
        }
    }

    // Symmetric normalized Laplacian: L̂ = I − D^{-1/2}·A·D^{-1/2}.
    let degree: Vec<f64> = adj.iter().map(|row| row.iter().sum()).collect();
    let mut lap = vec![vec![0.0_f64; n]; n];
    for i in 0..n {
        for j in 0..n {
            let norm = (degree[i] * degree[j]).sqrt();
            let a = if norm > 0.0 { adj[i][j] / norm } else { 0.0 };
            lap[i][j] = if i == j { 1.0 - a } else { -a };
        }
    }

    let (eigenvalues, eigenvectors) = jacobi_eigen(&mut lap, config.max_sweeps);

    // Bottom-k non-zero eigenpairs (skip the trivial ~0 eigenvalues of each
    // connected component's constant vector).
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        eigenvalues[a]
            .partial_cmp(&eigenvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let selected: Vec<usize> = order
        .iter()
        .copied()
        .filter(|&i| eigenvalues[i] > 1e-9)
        .take(k)
        .collect();

    debug!(
        n,
        k,
        kept = selected.len(),
        "Spectral embedding computed"
    );

    // Embedding rows: node i → (eigenvector components in selected columns).
    let dim = selected.len().max(1);
    let rows: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            if selected.is_empty() {
                vec![0.0]
            } else {
                selected.iter().map(|&c| eigenvectors[i][c]).collect()
            }
        })
        .collect();

    let assignment = kmeans(&rows, k, dim, config);

    // Relabel by cluster size descending (ties: smallest member index).
    let mut sizes: HashMap<u32, (usize, usize)> = HashMap::new();
    for (i, &c) in assignment.iter().enumerate() {
        let entry = sizes.entry(c).or_insert((0, usize::MAX));
        entry.0 += 1;
        entry.1 = entry.1.min(i);
    }
    let mut ordered: Vec<(u32, (usize, usize))> = sizes.into_iter().collect();
    ordered.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    let remap: HashMap<u32, u32> = ordered
        .iter()
        .enumerate()
        .map(|(new, &(old, _))| (old, new as u32))
        .collect();

    graph
        .iter_nodes()
        .map(|(idx, _)| (idx, remap[&assignment[idx.index()]]))
        .collect()
}

/// Cyclic Jacobi eigendecomposition of a symmetric matrix. Consumes the
/// input matrix; returns `(eigenvalues, eigenvectors)` with eigenvector
/// `j` in column `j`.
fn jacobi_eigen(a: &mut [Vec<f64>], max_sweeps: usize) -> (Vec<f64>, Vec<Vec<f64>>) {
    let n = a.len();
    let mut v = vec![vec![0.0; n]; n];
    for (i, row) in v.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    for _ in 0..max_sweeps {
        let mut off = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                off += a[i][j] * a[i][j];
            }
        }
        if off < 1e-18 {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                if a[p][q].abs() < 1e-15 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for i in 0..n {
                    let aip = a[i][p];
                    let aiq = a[i][q];
                    a[i][p] = c * aip - s * aiq;
                    a[i][q] = s * aip + c * aiq;
                }
                for i in 0..n {
                    let api = a[p][i];
                    let aqi = a[q][i];
                    a[p][i] = c * api - s * aqi;
                    a[q][i] = s * api + c * aqi;
                }
                for row in v.iter_mut() {
                    let vip = row[p];
                    let viq = row[q];
                    row[p] = c * vip - s * viq;
                    row[q] = s * vip + c * viq;
                }
            }
        }
    }

    let eigenvalues = (0..n).map(|i| a[i][i]).collect();
    (eigenvalues, v)
}

/// Seeded k-means++ over embedding rows. Returns per-row cluster ids.
fn kmeans(rows: &[Vec<f64>], k: usize, dim: usize, config: &SpectralConfig) -> Vec<u32> {
    let n = rows.len();
    if n == 0 {
        return Vec::new();
    }
    let k = k.min(n);
    let mut rng = StdRng::seed_from_u64(config.seed);

    // Farthest-first seeding: first centroid from a shuffled order, each
    // subsequent centroid maximizes distance to the chosen set.
    let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(k);
    let mut candidates: Vec<usize> = (0..n).collect();
    candidates.shuffle(&mut rng);
    centroids.push(rows[candidates[0]].clone());
    while centroids.len() < k {
        let mut best = (candidates[0], 0.0);
        for &i in &candidates {
            let d = centroids
                .iter()
                .map(|c| sq_dist(&rows[i], c))
                .fold(f64::INFINITY, f64::min);
            if d > best.1 {
                best = (i, d);
            }
        }
        centroids.push(rows[best.0].clone());
    }

    let mut assignment = vec![0u32; n];
    for _ in 0..config.max_kmeans_iters {
        let mut changed = false;
        for (i, row) in rows.iter().enumerate() {
            let nearest = centroids
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    sq_dist(row, a.as_slice())
                        .partial_cmp(&sq_dist(row, b.as_slice()))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map_or(0, |(c, _)| c as u32);
            if assignment[i] != nearest {
                assignment[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, row) in rows.iter().enumerate() {
            let c = assignment[i] as usize;
            counts[c] += 1;
            for (s, &x) in sums[c].iter_mut().zip(row.iter()) {
                *s += x;
            }
        }
        for (c, sum) in sums.iter().enumerate() {
            if counts[c] > 0 {
                centroids[c] = sum.iter().map(|&s| s / counts[c] as f64).collect();
            }
        }
    }
    assignment
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}
