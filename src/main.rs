use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use storyreel::args::Args;
use storyreel::media::Ffmpeg;
use storyreel::{Orchestrator, Stages};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting reddit story video generation pipeline");

    let args = Args::parse();
    let url = args.url.clone();
    let config = args.into_config();
    if let Err(err) = config.preflight() {
        error!("Configuration rejected: {}", err);
        return Err(err.into());
    }
    info!("Background video found: {}", config.background.display());

    let stages = Stages::from_config(&config, Arc::new(Ffmpeg::default()))?;
    let orchestrator = Orchestrator::new(config, stages);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling job");
            let _ = cancel_tx.send(true);
        }
    });

    let report = orchestrator.run(&url, cancel_rx).await;
    match report.outcome {
        Ok(artifact) => {
            info!("Process complete.");
            println!("{}", artifact.video.display());
            println!("{}", artifact.sidecar.display());
            println!("{}", artifact.hashtags.iter().map(|t| format!("#{t}")).collect::<Vec<_>>().join(" "));
            Ok(())
        }
        Err(err) => {
            let stage = report
                .job
                .failure
                .as_ref()
                .map(|f| f.stage.to_string())
                .unwrap_or_else(|| "unknown".into());
            anyhow::bail!("job {} failed during {}: {}", report.job.id, stage, err)
        }
    }
}
