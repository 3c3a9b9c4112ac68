pub mod capture;
pub mod devices;
pub mod dispatch;
pub mod error;
pub mod guide;
pub mod instructions;
pub mod metrics;
pub mod models;
pub mod service;
pub mod session;
pub mod settings;
pub mod utils;
pub mod voice;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use devices::StillImageDevices;
use guide::GuidePipeline;
use service::{HttpReasoningService, ReasoningService};
use settings::{GuardianSettings, SettingsStore};
use voice::ConsoleSynthesizer;

pub fn run() -> Result<()> {
    let store = SettingsStore::load()?;
    let settings = store.settings();

    // RUST_LOG still wins over the configured level.
    let level = if settings.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    info!("Guardian starting up...");
    if let Some(warning) = store.load_warning() {
        warn!("{warning}");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run_session(settings))
}

async fn run_session(settings: GuardianSettings) -> Result<()> {
    let request_timeout = settings.frame_timeout().max(settings.audio_timeout());
    let service: Arc<dyn ReasoningService> = Arc::new(HttpReasoningService::new(
        &settings.service_url,
        request_timeout,
    ));

    match service.health().await {
        Ok(health) => info!(
            "reasoning service {} (model connected: {})",
            health.status, health.gemini_connected
        ),
        Err(err) => warn!(
            "reasoning service at {} unreachable, continuing: {err}",
            settings.service_url
        ),
    }

    let frame_path = settings
        .demo_frame_path
        .clone()
        .context("no camera frame configured; set GUARDIAN_FRAME or demo_frame_path")?;
    let media = Arc::new(StillImageDevices::open(&frame_path)?);

    let pipeline = GuidePipeline::new(settings, service, media, Arc::new(ConsoleSynthesizer));
    let active = pipeline.start(None, None).await?;
    info!("session {} running, press Ctrl-C to end", active.session_id);

    let mut progress = pipeline.subscribe_progress();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = progress.borrow_and_update().clone();
                if let Some(step) = snapshot.current {
                    info!(
                        "step {}/{}: {}",
                        snapshot.current_step, snapshot.total_steps, step.display_text
                    );
                }
            }
        }
    }

    pipeline.end("User cancelled", false).await?;

    let metrics = pipeline.metrics().await;
    info!(
        "captures: {} total, {} completed, {} skipped, {} timed out, {} failed",
        metrics.capture_count,
        metrics.completed_count,
        metrics.skip_count,
        metrics.timeout_count,
        metrics.failure_count
    );
    Ok(())
}
