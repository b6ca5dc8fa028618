use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use sherpa_core::config::SherpaConfig;
use sherpa_core::runtime::SherpaRuntime;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Workspace root (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

pub async fn run(args: InitArgs) -> anyhow::Result<()> {
    let root = std::fs::canonicalize(&args.path)
        .with_context(|| format!("Cannot resolve path: {}", args.path.display()))?;
    let dir = super::sherpa_dir(&root);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Cannot create {}", dir.display()))?;

    let config_path = super::config_path(&root);
    if !config_path.exists() || args.force {
        let config = SherpaConfig::default();
        let text = toml::to_string_pretty(&config).context("Cannot serialize config")?;
        std::fs::write(&config_path, text)
            .with_context(|| format!("Cannot write {}", config_path.display()))?;
        println!("Wrote {}", config_path.display());
    }

    // Opening the runtime creates the database schema.
    let config = super::load_config(&root)?;
    let runtime = SherpaRuntime::open(config, &super::db_path(&root))
        .await
        .map_err(|e| anyhow::anyhow!("Cannot open database: {e}"))?;
    runtime
        .persist()
        .await
        .map_err(|e| anyhow::anyhow!("Cannot persist initial state: {e}"))?;

    println!("Initialized Sherpa in {}", dir.display());
    Ok(())
}
