use anyhow::Context;
use clap::Parser;
use scene_composer::api::ReqwestFetcher;
use scene_composer::video::FfmpegEngine;
use scene_composer::{Config, Document, Pipeline, RunInputs, Services};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "scene-composer")]
#[command(about = "Resolve scene visuals and compose the final narrated video", long_about = None)]
struct Args {
    /// Script JSON with the ordered scenes
    #[arg(short, long)]
    script: PathBuf,

    /// Story JSON the script was written from
    #[arg(long)]
    story: PathBuf,

    /// Narration audio for the whole script
    #[arg(short, long)]
    narration: PathBuf,

    /// TOML config file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run identifier used as the clip usage ledger key
    #[arg(long)]
    run_id: Option<String>,

    /// Working directory for intermediate files
    #[arg(short = 'w', long)]
    work_dir: Option<PathBuf>,

    /// Final video path
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::from_env(),
    };

    let run_id = args
        .run_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..8].to_string());
    let work_dir = args.work_dir.unwrap_or_else(|| config.paths.output.join(&run_id));
    let output = args.output.unwrap_or_else(|| work_dir.join("final_video.mp4"));

    info!("Run {}: script {}", run_id, args.script.display());

    let services = Services {
        engine: Arc::new(FfmpegEngine::new(&config.ffmpeg)),
        generation_http: Arc::new(ReqwestFetcher::new(
            Duration::from_secs(config.sources.generation_timeout_sec),
            config.sources.max_download_bytes,
        )?),
        evidence_http: Arc::new(ReqwestFetcher::new(
            Duration::from_secs(config.sources.evidence_timeout_sec),
            config.sources.max_download_bytes,
        )?),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run...");
            on_signal.cancel();
        }
    });

    let inputs = RunInputs {
        run_id,
        script: Document::File(args.script),
        story: Document::File(args.story),
        narration: args.narration,
        work_dir,
        output,
    };

    if let Err(e) = Pipeline::new(config, services).run(inputs, &cancel).await {
        error!("Video composition failed: {}", e);
        std::process::exit(1);
    }

    info!("Video composition completed successfully!");
    Ok(())
}
