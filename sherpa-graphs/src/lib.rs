//! Hypergraph engine for capability routing.
//!
//! Models tools and capabilities as a directed weighted hypergraph
//! ([`hypergraph::Hypergraph`]) and provides the algorithms the
//! recommendation engine runs over it: PageRank on the bipartite
//! projection, Louvain communities, spectral clustering, heat diffusion,
//! neighbourhood metrics, and dynamic shortest hyperpaths
//! ([`hyperpath`]).
//!
//! Everything in this crate is synchronous and CPU-bound; callers
//! orchestrate concurrency and I/O.

pub mod community;
pub mod diffusion;
pub mod hypergraph;
pub mod hyperpath;
pub mod metrics;
pub mod pagerank;
pub mod spectral;

pub use hypergraph::{
    EdgeIdx, EdgeRecord, EdgeSource, EdgeType, GraphUpdate, HyperNode, Hyperedge, HyperedgeSpec,
    Hypergraph, NodeIdx, NodeKind, NodeRecord, UpdateKind,
};
pub use hyperpath::{DynamicSssp, HyperpathResult};

/// Error type for the hypergraph engine.
#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    /// A node with this external id already exists.
    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    /// A hyperedge with this external id already exists.
    #[error("Duplicate hyperedge: {0}")]
    DuplicateEdge(String),

    /// No node with this external id.
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// No hyperedge with this external id.
    #[error("Unknown hyperedge: {0}")]
    UnknownEdge(String),

    /// A hyperedge endpoint references a node that does not exist.
    #[error("Dangling reference in hyperedge {edge}: node {node}")]
    DanglingRef { edge: String, node: String },

    /// A hyperedge was given an empty source or target set.
    #[error("Hyperedge {edge} has empty {side} set")]
    EmptySet { edge: String, side: &'static str },

    /// Weight must be finite and strictly positive.
    #[error("Invalid weight: {0}")]
    InvalidWeight(f64),

    /// The node still participates in hyperedges and cannot be removed.
    #[error("Node {node} is referenced by {edges} hyperedge(s)")]
    NodeReferenced { node: String, edges: usize },

    /// The caller's deadline elapsed mid-computation.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The graph was latched read-only after an internal invariant violation.
    #[error("Hypergraph is read-only pending inspection")]
    ReadOnly,
}

/// Convenience alias for `Result<T, GraphError>`.
pub type Result<T> = std::result::Result<T, GraphError>;
