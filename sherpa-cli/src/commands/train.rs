use std::path::PathBuf;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use sherpa_core::replay;

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Traces per sampled batch
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,
    /// Number of batches to train
    #[arg(long, default_value_t = 4)]
    pub rounds: u32,
    /// Minimum replay priority to consider
    #[arg(long, default_value_t = 0.1)]
    pub min_priority: f64,
    /// Workspace root (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
}

pub async fn run(args: TrainArgs) -> anyhow::Result<()> {
    let runtime = super::open_runtime(&args.path).await?;

    let bar = ProgressBar::new(u64::from(args.rounds));
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut trained = 0u32;
    for round in 0..args.rounds {
        let traces = replay::sample_by_priority(
            runtime.store.as_ref(),
            &runtime.config.per,
            args.batch_size,
            args.min_priority,
        )
        .await
        .map_err(|e| anyhow::anyhow!("Sampling failed: {e}"))?;

        if traces.is_empty() {
            bar.set_message("replay pool empty");
            break;
        }

        match runtime
            .learner
            .train_from_traces(&traces)
            .await
            .map_err(|e| anyhow::anyhow!("Training failed: {e}"))?
        {
            Some(report) => {
                trained += 1;
                bar.set_message(format!(
                    "round {}: loss {:.4}, accuracy {:.0}%",
                    round + 1,
                    report.loss,
                    report.accuracy * 100.0
                ));
            }
            None => bar.set_message("no trainable traces in batch"),
        }
        bar.inc(1);
    }
    bar.finish();

    if trained > 0 {
        runtime
            .persist()
            .await
            .map_err(|e| anyhow::anyhow!("Cannot persist model: {e}"))?;
        println!("Trained {trained} batch(es); model persisted.");
    } else {
        println!("Nothing to train on — save some traces first.");
    }
    Ok(())
}
