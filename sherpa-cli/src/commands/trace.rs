use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Subcommand};

use sherpa_core::replay;
use sherpa_core::store::SherpaStore;
use sherpa_core::types::TraceInput;

#[derive(Args, Debug)]
pub struct TraceArgs {
    #[command(subcommand)]
    pub command: TraceCommand,
    /// Workspace root (default: current directory)
    #[arg(long, default_value = ".", global = true)]
    pub path: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum TraceCommand {
    /// Save a trace from a JSON file (TraceInput shape)
    Save {
        /// Path to the JSON document
        file: PathBuf,
    },
    /// Sample traces by replay priority
    Sample {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value_t = 0.1)]
        min_priority: f64,
    },
    /// Redact all traces tied to a user
    Anonymize {
        /// User identifier to redact
        user_id: String,
    },
    /// Show trace-store statistics
    Stats,
}

pub async fn run(args: TraceArgs) -> anyhow::Result<()> {
    let runtime = super::open_runtime(&args.path).await?;

    match args.command {
        TraceCommand::Save { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Cannot read {}", file.display()))?;
            let input: TraceInput = serde_json::from_str(&text)
                .with_context(|| format!("Cannot parse {}", file.display()))?;
            let trace = runtime
                .store
                .save_trace(input)
                .await
                .map_err(|e| anyhow::anyhow!("Cannot save trace: {e}"))?;
            println!("Saved trace {} (priority {:.2})", trace.trace_id, trace.priority);
        }
        TraceCommand::Sample {
            limit,
            min_priority,
        } => {
            let traces = replay::sample_by_priority(
                runtime.store.as_ref(),
                &runtime.config.per,
                limit,
                min_priority,
            )
            .await
            .map_err(|e| anyhow::anyhow!("Sampling failed: {e}"))?;
            if traces.is_empty() {
                println!("Replay pool is empty above priority {min_priority}.");
            }
            for t in traces {
                println!(
                    "{}  {}  {}  priority {:.2}  [{}]",
                    t.trace_id,
                    t.node_id,
                    if t.success { "ok" } else { "failed" },
                    t.priority,
                    t.executed_path.join(" → ")
                );
            }
        }
        TraceCommand::Anonymize { user_id } => {
            let count = runtime
                .store
                .anonymize_user_traces(&user_id)
                .await
                .map_err(|e| anyhow::anyhow!("Anonymization failed: {e}"))?;
            println!("Redacted {count} trace(s).");
        }
        TraceCommand::Stats => {
            let stats = runtime
                .store
                .stats()
                .await
                .map_err(|e| anyhow::anyhow!("Cannot compute stats: {e}"))?;
            println!("total:         {}", stats.total);
            println!("successful:    {}", stats.successful);
            println!("avg duration:  {:.1} ms", stats.avg_duration_ms);
            println!("avg priority:  {:.3}", stats.avg_priority);
        }
    }
    Ok(())
}
