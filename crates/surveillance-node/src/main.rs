use anyhow::{Context, Result};
use identity::Gallery;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use surveillance_node::alerting::{LogNotifier, TerminalBellNotifier};
use surveillance_node::event_log::EventLog;
use surveillance_node::mock::{MeanColorExtractor, MockPersonDetector};
use surveillance_node::source::ImageSequenceSource;
use surveillance_node::{NodeConfig, SurveillancePipeline};
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const SNAPSHOT_EVERY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let log_config =
        telemetry::LogConfig::new("surveillance-node").with_version(env!("CARGO_PKG_VERSION"));
    let _log_guard = telemetry::init_structured_logging(log_config);

    let config = NodeConfig::from_env()?;

    let gallery = Gallery::load_dir(&config.gallery_dir)
        .with_context(|| format!("Failed to load gallery from {}", config.gallery_dir.display()))?;
    info!(
        gallery_dir = %config.gallery_dir.display(),
        people = gallery.person_names().len(),
        embeddings = gallery.len(),
        "Gallery loaded"
    );

    // outputs open before the camera so an early return never leaves it held
    let mut event_log = match &config.event_log_path {
        Some(path) => Some(EventLog::open(path).await?),
        None => None,
    };

    let source = ImageSequenceSource::new(&config.frame_source_dir)
        .looping(true)
        .with_frame_interval(config.frame_interval);

    let mut pipeline = SurveillancePipeline::builder(config.pipeline.clone())
        .with_source(source)
        .with_detector(MockPersonDetector::centered(1))
        .with_extractor(MeanColorExtractor)
        .with_gallery(gallery)
        .with_notifier(Arc::new(LogNotifier))
        .with_notifier(Arc::new(TerminalBellNotifier))
        .start()
        .await?;

    let shutdown = shutdown_signal(config.run_for);
    tokio::pin!(shutdown);

    let mut last_snapshot: Option<Instant> = None;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            frame = pipeline.poll_annotated_frame(POLL_INTERVAL) => {
                let Some(frame) = frame else { continue };
                for overlay in &frame.overlays {
                    info!(frame_index = frame.frame_index, fps = frame.fps, "{}", overlay.label);
                }

                if let Some(path) = &config.snapshot_path {
                    let due = last_snapshot.map_or(true, |at| at.elapsed() >= SNAPSHOT_EVERY);
                    if due {
                        last_snapshot = Some(Instant::now());
                        if let Err(e) = write_snapshot(path.clone(), frame.image).await {
                            warn!(error = %e, "Failed to write snapshot");
                        }
                    }
                }
            }
        }

        drain_events(&mut pipeline, event_log.as_mut()).await;
    }

    if let Err(e) = pipeline.stop().await {
        error!(error = %e, "Pipeline did not stop cleanly");
    }
    drain_events(&mut pipeline, event_log.as_mut()).await;

    if let Some(log) = event_log.as_mut() {
        log.flush().await?;
    }

    match telemetry::metrics::encode_metrics() {
        Ok(metrics) => debug!("Final metrics:\n{metrics}"),
        Err(e) => warn!(error = %e, "Failed to encode metrics"),
    }
    info!("surveillance-node exiting");
    Ok(())
}

/// Move every queued detection event into the event log
async fn drain_events(pipeline: &mut SurveillancePipeline, mut log: Option<&mut EventLog>) {
    while let Some(event) = pipeline.poll_detection_event(Duration::ZERO).await {
        if let Some(log) = log.as_deref_mut() {
            if let Err(e) = log.append(&event).await {
                warn!(path = %log.path().display(), error = %e, "Failed to record detection");
            }
        }
    }
}

async fn write_snapshot(path: PathBuf, image: RgbImage) -> Result<()> {
    tokio::task::spawn_blocking(move || save_image(&path, &image))
        .await
        .context("Snapshot task failed")?
}

fn save_image(path: &Path, image: &RgbImage) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    image
        .save(path)
        .with_context(|| format!("Failed to save {}", path.display()))
}

async fn shutdown_signal(run_for: Option<Duration>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let deadline = async {
        match run_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
        _ = deadline => info!("Run time elapsed"),
    }

    info!("Shutting down gracefully...");
}
