use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Transport type (only stdio is supported)
    #[arg(long, value_parser = ["stdio"], default_value = "stdio")]
    pub transport: String,
    /// Workspace root (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let root = std::fs::canonicalize(&args.path)
        .with_context(|| format!("Cannot resolve path: {}", args.path.display()))?;
    sherpa_mcp::resolve_db_path(&root).with_context(|| {
        format!(
            "Sherpa is not initialized in {}. Run `sherpa init` first.",
            root.display()
        )
    })?;

    let runtime = super::open_runtime(&root).await?;
    sherpa_mcp::serve_stdio(Arc::new(runtime))
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;
    Ok(())
}
