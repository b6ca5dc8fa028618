//! Sherpa core library — capability scoring, hyperpath routing, and the
//! online learning loop.
//!
//! The main entry point is [`predict::Predictor`], which combines the
//! attention scorer ([`shgat::ShgatModel`]) with the hypergraph service
//! ([`engine::HypergraphService`]) to answer the two public questions:
//! which capability serves an intent, and which tool to invoke next.
//! Executed traces flow back through [`learn::LearningLoop`].

pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod features;
pub mod learn;
pub mod predict;
pub mod provides;
pub mod replay;
pub mod runtime;
pub mod shgat;
pub mod store;
pub mod types;

// Graph vocabulary shared with downstream crates.
pub use sherpa_graphs::{
    EdgeRecord, EdgeSource, EdgeType, GraphError, GraphUpdate, HyperedgeSpec, NodeKind,
    NodeRecord,
};
