use frame_pacer::pipeline::emitter::JsonLineEmitter;
use frame_pacer::pipeline::interpolation::InterpolationStage;
use frame_pacer::pipeline::playback::PlaybackScheduler;
use frame_pacer::pipeline::state::ProcessingStage;
use frame_pacer::pipeline::{self, PipelineError};
use frame_pacer::services::detector;
use frame_pacer::services::enhance;
use frame_pacer::source::open_source;
use frame_pacer_common::config::Config;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit status for a run interrupted by Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            return ExitCode::FAILURE;
        }
    };

    // stdout carries packets only.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = %config.source.path.display(),
        scale = config.enhance.scale,
        batch_size = config.detection.batch_size,
        timestep = config.interpolation.timestep,
        target_fps = config.playback.target_fps,
        "starting frame-pacer"
    );

    let mut source = match open_source(&config.source).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open input");
            return ExitCode::FAILURE;
        }
    };

    let enhancer = match enhance::from_config(&config.enhance) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "failed to start enhancement model");
            return ExitCode::FAILURE;
        }
    };

    let stage = ProcessingStage::new(
        config.detection.batch_size,
        config.interpolation.timestep,
        enhancer,
        detector::from_config(&config.detection),
        InterpolationStage::from_config(&config.interpolation),
    );
    let scheduler = PlaybackScheduler::new(config.playback.target_fps);
    let mut emitter = JsonLineEmitter::new(
        BufWriter::new(std::io::stdout()),
        config.playback.target_fps,
        config.playback.jpeg_quality,
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            on_signal.cancel();
        }
    });

    match pipeline::run(stage, &mut source, &scheduler, &mut emitter, &cancel).await {
        Ok(summary) => {
            info!(
                emitted = summary.emitted,
                failed = summary.failed,
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(PipelineError::Cancelled) => ExitCode::from(EXIT_CANCELLED),
        Err(e) => {
            error!(error = %e, "pipeline failed");
            ExitCode::FAILURE
        }
    }
}
