use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Args;

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Natural-language intent
    pub intent: String,
    /// Recently used tool/capability ids, oldest first
    #[arg(long = "context", value_name = "NODE")]
    pub context: Vec<String>,
    /// Score threshold below which nothing is suggested
    #[arg(long)]
    pub threshold: Option<f32>,
    /// Deadline in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub deadline_ms: u64,
    /// Workspace root (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
    /// Emit JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: PredictArgs) -> anyhow::Result<()> {
    let runtime = super::open_runtime(&args.path).await?;
    let deadline = Instant::now() + Duration::from_millis(args.deadline_ms);
    let suggestion = runtime
        .predictor
        .predict_next_node(&args.intent, &args.context, args.threshold, Some(deadline))
        .await
        .map_err(|e| anyhow::anyhow!("Prediction failed: {e}"))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&suggestion)?);
        return Ok(());
    }

    match suggestion {
        Some(s) => {
            println!("next tool:   {}", s.next_node);
            println!("capability:  {}", s.capability);
            println!("confidence:  {:.3}", s.confidence);
            if s.path.len() > 1 {
                println!("path:        {}", s.path.join(" → "));
            }
        }
        None => println!("No capability scored above the threshold."),
    }
    Ok(())
}
