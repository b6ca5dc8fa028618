use std::path::PathBuf;

use clap::Args;

#[derive(Args, Debug)]
pub struct ScoreArgs {
    /// Natural-language intent
    pub intent: String,
    /// Recently used tool/capability ids, oldest first
    #[arg(long = "context", value_name = "NODE")]
    pub context: Vec<String>,
    /// Maximum results to print
    #[arg(long, default_value_t = 10)]
    pub top: usize,
    /// Workspace root (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
    /// Emit JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ScoreArgs) -> anyhow::Result<()> {
    let runtime = super::open_runtime(&args.path).await?;
    let scores = runtime
        .predictor
        .score_capabilities(&args.intent, &args.context, None)
        .await
        .map_err(|e| anyhow::anyhow!("Scoring failed: {e}"))?;

    if args.json {
        let out: Vec<_> = scores.iter().take(args.top).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if scores.is_empty() {
        println!("No capabilities with embeddings are registered.");
        return Ok(());
    }

    for (rank, s) in scores.iter().take(args.top).enumerate() {
        println!(
            "{:>2}. {:<32} {:.3}  [{}]",
            rank + 1,
            s.id,
            s.score,
            s.rationale
        );
    }
    Ok(())
}
