use std::path::PathBuf;

use clap::Args;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Workspace root (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
    /// Emit JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: StatusArgs) -> anyhow::Result<()> {
    let runtime = super::open_runtime(&args.path).await?;
    let stats = runtime
        .stats()
        .await
        .map_err(|e| anyhow::anyhow!("Cannot compute stats: {e}"))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Graph");
    println!("  nodes:         {}", stats.node_count);
    for (kind, count) in &stats.nodes_by_kind {
        println!("    {kind}: {count}");
    }
    println!("  hyperedges:    {}", stats.edge_count);
    for (edge_type, count) in &stats.edges_by_type {
        println!("    {edge_type}: {count}");
    }
    println!("  version:       {}", stats.graph_version);
    println!("  avg pagerank:  {:.6}", stats.avg_pagerank);
    println!("Traces");
    println!("  total:         {}", stats.traces.total);
    println!("  successful:    {}", stats.traces.successful);
    println!("  avg duration:  {:.1} ms", stats.traces.avg_duration_ms);
    println!("  avg priority:  {:.3}", stats.traces.avg_priority);
    println!("Scoring");
    println!("  cache hits:    {:.1}%", stats.stats_cache_hit_rate * 100.0);
    println!("  avg alpha:     {:.2}", stats.avg_alpha);
    Ok(())
}
