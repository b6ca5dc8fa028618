use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Subcommand};

use sherpa_core::{EdgeSource, EdgeType, HyperedgeSpec, NodeKind};

#[derive(Args, Debug)]
pub struct GraphArgs {
    #[command(subcommand)]
    pub command: GraphCommand,
    /// Workspace root (default: current directory)
    #[arg(long, default_value = ".", global = true)]
    pub path: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum GraphCommand {
    /// Register a node (tool, capability, meta) with a description to embed
    AddNode {
        /// Stable node id
        id: String,
        /// Node kind: tool, capability, meta
        #[arg(long, default_value = "tool")]
        kind: String,
        /// Description text used for the embedding
        #[arg(long)]
        description: String,
        /// Parent capability to attach this node under
        #[arg(long)]
        parent: Option<String>,
    },
    /// Add a hyperedge between existing nodes
    AddEdge {
        /// Stable edge id
        id: String,
        /// Source node ids
        #[arg(long = "from", value_name = "NODE", required = true)]
        sources: Vec<String>,
        /// Target node ids
        #[arg(long = "to", value_name = "NODE", required = true)]
        targets: Vec<String>,
        /// Edge type: contains, sequence, dependency, provides, alternative
        #[arg(long, default_value = "sequence")]
        edge_type: String,
        /// Provenance: template, inferred, observed
        #[arg(long, default_value = "template")]
        source: String,
    },
    /// Top nodes by PageRank
    Pagerank {
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Louvain community assignments
    Communities,
    /// Spectral cluster assignments
    Clusters,
    /// Shortest hyperpath between two nodes
    Path { from: String, to: String },
    /// Remove nodes no hyperedge references
    Sweep,
}

fn parse_kind(s: &str) -> anyhow::Result<NodeKind> {
    match s {
        "tool" => Ok(NodeKind::Tool),
        "capability" => Ok(NodeKind::Capability),
        "meta" => Ok(NodeKind::MetaCapability),
        other => anyhow::bail!("Unknown node kind: {other} (tool|capability|meta)"),
    }
}

pub async fn run(args: GraphArgs) -> anyhow::Result<()> {
    let runtime = super::open_runtime(&args.path).await?;

    match args.command {
        GraphCommand::AddNode {
            id,
            kind,
            description,
            parent,
        } => {
            let kind = parse_kind(&kind)?;
            runtime
                .register_node(&id, kind, &description)
                .await
                .map_err(|e| anyhow::anyhow!("Cannot add node: {e}"))?;
            if let Some(parent) = parent {
                runtime
                    .engine
                    .link_hierarchy(&parent, &id)
                    .map_err(|e| anyhow::anyhow!("Cannot link hierarchy: {e}"))?;
            }
            runtime
                .persist()
                .await
                .map_err(|e| anyhow::anyhow!("Cannot persist: {e}"))?;
            println!("Added {kind:?} node {id}");
        }
        GraphCommand::AddEdge {
            id,
            sources,
            targets,
            edge_type,
            source,
        } => {
            let edge_type = EdgeType::from_str(&edge_type).map_err(|e| anyhow::anyhow!(e))?;
            let edge_source = EdgeSource::from_str(&source).map_err(|e| anyhow::anyhow!(e))?;
            runtime
                .engine
                .add_hyperedge(HyperedgeSpec {
                    id: id.clone(),
                    sources,
                    targets,
                    edge_type,
                    edge_source,
                    weight: None,
                    metadata: std::collections::HashMap::new(),
                })
                .map_err(|e| anyhow::anyhow!("Cannot add hyperedge: {e}"))?;
            runtime
                .persist()
                .await
                .map_err(|e| anyhow::anyhow!("Cannot persist: {e}"))?;
            println!("Added {edge_type} hyperedge {id}");
        }
        GraphCommand::Pagerank { top } => {
            let scores = runtime.engine.pagerank();
            let mut ranked: Vec<_> = scores.iter().collect();
            ranked.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
            for (rank, (id, score)) in ranked.into_iter().take(top).enumerate() {
                println!("{:>2}. {:<32} {score:.6}", rank + 1, id);
            }
        }
        GraphCommand::Communities => {
            let communities = runtime.engine.communities();
            let mut entries: Vec<_> = communities.iter().collect();
            entries.sort_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)));
            for (id, community) in entries {
                println!("{community:>3}  {id}");
            }
        }
        GraphCommand::Clusters => {
            let clusters = runtime.engine.spectral_clusters();
            let mut entries: Vec<_> = clusters.iter().collect();
            entries.sort_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)));
            for (id, cluster) in entries {
                println!("{cluster:>3}  {id}");
            }
        }
        GraphCommand::Path { from, to } => {
            let view = runtime
                .engine
                .find_shortest_hyperpath(&from, &to, None)
                .map_err(|e| anyhow::anyhow!("Path query failed: {e}"))?;
            if view.found {
                println!("{}", view.node_sequence.join(" → "));
                println!("total weight: {:.4}", view.total_weight);
            } else {
                println!("No hyperpath from {from} to {to}.");
            }
        }
        GraphCommand::Sweep => {
            let removed = runtime
                .engine
                .sweep_unreferenced()
                .map_err(|e| anyhow::anyhow!("Sweep failed: {e}"))?;
            runtime
                .persist()
                .await
                .map_err(|e| anyhow::anyhow!("Cannot persist: {e}"))?;
            println!("Removed {removed} unreferenced node(s).");
        }
    }
    Ok(())
}
