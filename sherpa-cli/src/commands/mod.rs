pub mod graph;
pub mod init;
pub mod predict;
pub mod score;
pub mod serve;
pub mod status;
pub mod trace;
pub mod train;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Subcommand;

use sherpa_core::config::SherpaConfig;
use sherpa_core::runtime::SherpaRuntime;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize a Sherpa workspace (.sherpa/ config + database)
    Init(init::InitArgs),
    /// Show engine statistics
    Status(status::StatusArgs),
    /// Rank capabilities for an intent
    Score(score::ScoreArgs),
    /// Suggest the next tool to invoke
    Predict(predict::PredictArgs),
    /// Train the scorer on replayed traces
    Train(train::TrainArgs),
    /// Manage execution traces
    Trace(trace::TraceArgs),
    /// Inspect and edit the capability hypergraph
    Graph(graph::GraphArgs),
    /// Start the MCP server for AI agent integration
    Serve(serve::ServeArgs),
}

pub async fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Init(args) => init::run(args).await,
        Command::Status(args) => status::run(args).await,
        Command::Score(args) => score::run(args).await,
        Command::Predict(args) => predict::run(args).await,
        Command::Train(args) => train::run(args).await,
        Command::Trace(args) => trace::run(args).await,
        Command::Graph(args) => graph::run(args).await,
        Command::Serve(args) => serve::run(args).await,
    }
}

/// `.sherpa/` layout under a workspace root.
pub fn sherpa_dir(root: &Path) -> PathBuf {
    root.join(".sherpa")
}

pub fn config_path(root: &Path) -> PathBuf {
    sherpa_dir(root).join("config.toml")
}

pub fn db_path(root: &Path) -> PathBuf {
    sherpa_dir(root).join("sherpa.db")
}

/// Load the workspace config, or defaults when the file is absent.
pub fn load_config(root: &Path) -> anyhow::Result<SherpaConfig> {
    let path = config_path(root);
    if !path.exists() {
        return Ok(SherpaConfig::default());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Cannot read config: {}", path.display()))?;
    SherpaConfig::from_toml(&text)
        .with_context(|| format!("Cannot parse config: {}", path.display()))
}

/// Open the engine for an initialized workspace.
pub async fn open_runtime(root: &Path) -> anyhow::Result<SherpaRuntime> {
    let root = std::fs::canonicalize(root)
        .with_context(|| format!("Cannot resolve path: {}", root.display()))?;
    let db = db_path(&root);
    if !db.exists() {
        anyhow::bail!(
            "Sherpa is not initialized in {}. Run `sherpa init` first.",
            root.display()
        );
    }
    let config = load_config(&root)?;
    SherpaRuntime::open(config, &db)
        .await
        .map_err(|e| anyhow::anyhow!("Cannot open engine: {e}"))
}
