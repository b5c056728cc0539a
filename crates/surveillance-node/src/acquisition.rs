//! Frame acquisition worker.
//!
//! Reads frames from the source as fast as it yields them, normalises them to
//! the processing resolution and offers them to the frame queue. A full queue
//! drops the frame; read failures pause briefly and retry. The worker owns the
//! source and releases it on the way out, however the loop ends.

use crate::queue::{LossySender, Offer};
use common::{unix_timestamp_millis, FrameSource, VideoFrame};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::time::Duration;
use telemetry::metrics::{SURVEILLANCE_FRAMES_ACQUIRED, SURVEILLANCE_FRAME_READ_FAILURES};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct AcquisitionSettings {
    pub width: u32,
    pub height: u32,
    /// Pause after a failed or empty read
    pub retry_delay: Duration,
}

/// Resize `image` to exactly `width`x`height` unless it already matches
pub fn normalize_frame(image: RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        image
    } else {
        imageops::resize(&image, width, height, FilterType::Triangle)
    }
}

/// Run until `cancel` fires or the frame queue's receiver goes away, then
/// release the source exactly once and report the release outcome.
pub async fn run_acquisition(
    mut source: Box<dyn FrameSource>,
    frames: LossySender<VideoFrame>,
    settings: AcquisitionSettings,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let description = source.describe();
    info!(source = %description, "Frame acquisition started");

    let mut sequence = 0u64;
    let mut dropped = 0u64;

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = source.next_frame() => read,
        };

        match read {
            Ok(Some(image)) => {
                sequence += 1;
                SURVEILLANCE_FRAMES_ACQUIRED.inc();

                let frame = VideoFrame {
                    sequence,
                    captured_at_ms: unix_timestamp_millis(),
                    image: normalize_frame(image, settings.width, settings.height),
                };

                match frames.offer(frame) {
                    Offer::Accepted => {}
                    Offer::Dropped => {
                        dropped += 1;
                        debug!(sequence, "Frame queue full, dropping frame");
                    }
                    Offer::Closed => {
                        debug!("Frame queue closed");
                        break;
                    }
                }
            }
            Ok(None) => {
                if pause_or_cancelled(settings.retry_delay, &cancel).await {
                    break;
                }
            }
            Err(e) => {
                SURVEILLANCE_FRAME_READ_FAILURES.inc();
                warn!(source = %description, error = %e, "Failed to read frame");
                if pause_or_cancelled(settings.retry_delay, &cancel).await {
                    break;
                }
            }
        }

        // an always-ready source must not starve the other workers
        tokio::task::yield_now().await;
    }

    info!(
        source = %description,
        frames = sequence,
        dropped,
        "Frame acquisition stopped"
    );

    // the frame queue closes before the source is released
    drop(frames);
    source.release().await
}

/// Sleep for `delay`; returns true if cancelled first
async fn pause_or_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
