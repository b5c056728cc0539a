//! Processing worker: detection, per-track identity, annotation and alerting.

use crate::alerting::{AlertDispatcher, AlertPolicy, UnknownPersonAlert};
use crate::annotate::{draw_fps, draw_overlays, overlay_label, FpsMeter};
use crate::config::PipelineConfig;
use crate::queue::{LossyReceiver, LossySender, Offer, Recv};
use common::{
    unix_timestamp_secs, AnnotatedFrame, DetectionEvent, Detector, Embedding, EmbeddingExtractor,
    TrackId, TrackOverlay, TrackedDetection, VideoFrame,
};
use identity::{IdentityResolver, ResolutionReason, TrackCache, Verification};
use image::{imageops, RgbImage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::metrics::{
    SURVEILLANCE_CAPABILITY_FAILURES, SURVEILLANCE_FRAMES_PROCESSED,
    SURVEILLANCE_FRAME_PROCESSING_TIME, SURVEILLANCE_IDENTITY_RESOLUTIONS,
    SURVEILLANCE_TRACKS_CACHED, SURVEILLANCE_TRACKS_EVICTED,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened while processing one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub tracks: usize,
    pub unknown_tracks: Vec<TrackId>,
    /// Tracks resolved against the gallery this frame (the rest reused a cached identity)
    pub resolved_tracks: Vec<TrackId>,
    pub alerted: bool,
    pub evicted: Vec<TrackId>,
}

impl FrameReport {
    pub fn unknown_present(&self) -> bool {
        !self.unknown_tracks.is_empty()
    }
}

/// Output queues the worker publishes to
#[derive(Debug)]
pub struct ProcessingOutputs {
    pub results: LossySender<AnnotatedFrame>,
    pub events: LossySender<DetectionEvent>,
}

pub struct ProcessingWorker {
    detector: Box<dyn Detector>,
    extractor: Arc<dyn EmbeddingExtractor>,
    resolver: Arc<dyn IdentityResolver>,
    tracks: TrackCache,
    alert_policy: AlertPolicy,
    alerts: AlertDispatcher,
    outputs: ProcessingOutputs,
    source_label: String,
    frame_index: u64,
    fps: FpsMeter,
}

impl ProcessingWorker {
    pub fn new(
        config: &PipelineConfig,
        detector: Box<dyn Detector>,
        extractor: Arc<dyn EmbeddingExtractor>,
        resolver: Arc<dyn IdentityResolver>,
        alerts: AlertDispatcher,
        outputs: ProcessingOutputs,
    ) -> Self {
        Self {
            detector,
            extractor,
            resolver,
            tracks: TrackCache::new(config.recheck_policy()),
            alert_policy: AlertPolicy::new(config.max_frames_before_recheck),
            alerts,
            outputs,
            source_label: config.source_label.clone(),
            frame_index: 0,
            fps: FpsMeter::default(),
        }
    }

    /// Index the next processed frame will get
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn tracks(&self) -> &TrackCache {
        &self.tracks
    }

    /// Consume frames until `cancel` fires or the frame queue closes
    pub async fn run(
        mut self,
        mut frames: LossyReceiver<VideoFrame>,
        poll_timeout: Duration,
        cancel: CancellationToken,
    ) {
        info!(source = %self.source_label, "Frame processing started");

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = frames.recv_timeout(poll_timeout) => next,
            };

            match next {
                Recv::Item(frame) => {
                    self.process_frame(frame).await;
                }
                Recv::TimedOut => {
                    debug!("No frame within poll timeout");
                }
                Recv::Closed => {
                    debug!("Frame queue closed");
                    break;
                }
            }
        }

        info!(
            source = %self.source_label,
            frames = self.frame_index,
            tracks_cached = self.tracks.len(),
            "Frame processing stopped"
        );
    }

    pub async fn process_frame(&mut self, frame: VideoFrame) -> FrameReport {
        let started = Instant::now();
        let frame_index = self.frame_index;
        let VideoFrame {
            sequence,
            image: mut canvas,
            ..
        } = frame;

        let detections = match self.detector.detect_and_track(&canvas).await {
            Ok(detections) => detections,
            Err(e) => {
                SURVEILLANCE_CAPABILITY_FAILURES
                    .with_label_values(&["detector"])
                    .inc();
                warn!(frame_index, error = %e, "Detector failed, treating frame as empty");
                Vec::new()
            }
        };

        let mut overlays = Vec::with_capacity(detections.len());
        let mut unknown_tracks = Vec::new();
        let mut resolved_tracks = Vec::new();

        for detection in &detections {
            let embedding =
                embed_detection(self.extractor.as_ref(), &canvas, detection, frame_index).await;
            let observation = self.tracks.observe(
                detection.track_id,
                embedding,
                frame_index,
                self.resolver.as_ref(),
            );

            if let Verification::Resolved(reason) = observation.verification {
                let outcome = if observation.identity.is_unknown() {
                    "unknown"
                } else {
                    "known"
                };
                SURVEILLANCE_IDENTITY_RESOLUTIONS
                    .with_label_values(&[reason.as_str(), outcome])
                    .inc();
                if reason == ResolutionReason::EmbeddingMismatch {
                    info!(
                        track_id = detection.track_id,
                        frame_index,
                        identity = %observation.identity,
                        "Track embedding changed, re-identified"
                    );
                } else {
                    debug!(
                        track_id = detection.track_id,
                        frame_index,
                        reason = reason.as_str(),
                        identity = %observation.identity,
                        "Resolved track identity"
                    );
                }
                resolved_tracks.push(detection.track_id);
            }

            if observation.identity.is_unknown() {
                unknown_tracks.push(detection.track_id);
            }

            let event = DetectionEvent {
                person_name: observation.identity.name().to_string(),
                timestamp: unix_timestamp_secs(),
                source_label: self.source_label.clone(),
                track_id: detection.track_id,
            };
            if self.outputs.events.offer(event) == Offer::Dropped {
                debug!(track_id = detection.track_id, "Event queue full, dropping event");
            }

            let mut overlay = TrackOverlay {
                track_id: detection.track_id,
                bbox: detection.bbox,
                identity: observation.identity,
                confidence: detection.confidence,
                label: String::new(),
            };
            overlay.label = overlay_label(&overlay);
            overlays.push(overlay);
        }

        draw_overlays(&mut canvas, &overlays);
        let fps = self.fps.tick(Instant::now());
        draw_fps(&mut canvas, fps);

        let unknown_present = !unknown_tracks.is_empty();
        let alerted = self.alert_policy.should_alert(frame_index, unknown_present);
        if alerted {
            let alert = UnknownPersonAlert {
                frame_index,
                source_label: self.source_label.clone(),
                unknown_tracks: unknown_tracks.clone(),
                timestamp: unix_timestamp_secs(),
            };
            self.alerts.dispatch(&alert).await;
        }

        let evicted = self.tracks.evict_stale(frame_index);
        if !evicted.is_empty() {
            SURVEILLANCE_TRACKS_EVICTED.inc_by(evicted.len() as u64);
            debug!(frame_index, tracks = ?evicted, "Evicted stale tracks");
        }
        SURVEILLANCE_TRACKS_CACHED.set(self.tracks.len() as i64);

        let annotated = AnnotatedFrame {
            sequence,
            frame_index,
            image: canvas,
            overlays,
            fps,
            unknown_present,
        };
        if self.outputs.results.offer(annotated) == Offer::Dropped {
            debug!(frame_index, "Results queue full, dropping annotated frame");
        }

        SURVEILLANCE_FRAMES_PROCESSED.inc();
        SURVEILLANCE_FRAME_PROCESSING_TIME.observe(started.elapsed().as_secs_f64());
        self.frame_index += 1;

        FrameReport {
            frame_index,
            tracks: detections.len(),
            unknown_tracks,
            resolved_tracks,
            alerted,
            evicted,
        }
    }
}

/// Crop the detection and embed it; any failure yields no embedding
async fn embed_detection(
    extractor: &dyn EmbeddingExtractor,
    frame: &RgbImage,
    detection: &TrackedDetection,
    frame_index: u64,
) -> Option<Embedding> {
    let (width, height) = frame.dimensions();
    let bbox = detection.bbox.clamp_to(width, height)?;
    let crop = imageops::crop_imm(frame, bbox.x, bbox.y, bbox.width, bbox.height).to_image();

    match extractor.extract(&crop).await {
        Ok(embedding) => embedding,
        Err(e) => {
            SURVEILLANCE_CAPABILITY_FAILURES
                .with_label_values(&["embedding"])
                .inc();
            warn!(
                track_id = detection.track_id,
                frame_index,
                error = %e,
                "Embedding extraction failed"
            );
            None
        }
    }
}
