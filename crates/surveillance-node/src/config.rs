use crate::error::PipelineError;
use anyhow::{Context, Result};
use identity::RecheckPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Tuning knobs for one pipeline instance (one camera)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minimum cosine similarity to accept a gallery match
    #[serde(default = "default_identification_threshold")]
    pub identification_threshold: f32,

    /// Minimum cosine similarity between a track's new and stored embedding
    /// to keep its identity without re-resolving
    #[serde(default = "default_reidentification_threshold")]
    pub reidentification_threshold: f32,

    /// Recheck window for Unknown tracks and the alert sampling period, in frames
    #[serde(default = "default_max_frames_before_recheck")]
    pub max_frames_before_recheck: u64,

    /// Evict track records unseen for this many frames (0 disables eviction)
    #[serde(default = "default_track_eviction_frames")]
    pub track_eviction_frames: u64,

    #[serde(default = "default_processing_size")]
    pub processing_width: u32,

    #[serde(default = "default_processing_size")]
    pub processing_height: u32,

    #[serde(default = "default_queue_capacity")]
    pub frame_queue_capacity: usize,

    #[serde(default = "default_queue_capacity")]
    pub results_queue_capacity: usize,

    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// How long the processing worker waits for a frame before re-checking the stop signal
    #[serde(default = "default_frame_poll_timeout_ms")]
    pub frame_poll_timeout_ms: u64,

    /// Pause after a failed or empty frame read
    #[serde(default = "default_read_retry_delay_ms")]
    pub read_retry_delay_ms: u64,

    /// Camera name attached to every detection event
    #[serde(default = "default_source_label")]
    pub source_label: String,
}

fn default_identification_threshold() -> f32 {
    0.35
}

fn default_reidentification_threshold() -> f32 {
    0.35
}

fn default_max_frames_before_recheck() -> u64 {
    250
}

fn default_track_eviction_frames() -> u64 {
    750
}

fn default_processing_size() -> u32 {
    640
}

fn default_queue_capacity() -> usize {
    5
}

fn default_event_queue_capacity() -> usize {
    64
}

fn default_frame_poll_timeout_ms() -> u64 {
    1000
}

fn default_read_retry_delay_ms() -> u64 {
    100
}

fn default_source_label() -> String {
    "camera-0".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            identification_threshold: default_identification_threshold(),
            reidentification_threshold: default_reidentification_threshold(),
            max_frames_before_recheck: default_max_frames_before_recheck(),
            track_eviction_frames: default_track_eviction_frames(),
            processing_width: default_processing_size(),
            processing_height: default_processing_size(),
            frame_queue_capacity: default_queue_capacity(),
            results_queue_capacity: default_queue_capacity(),
            event_queue_capacity: default_event_queue_capacity(),
            frame_poll_timeout_ms: default_frame_poll_timeout_ms(),
            read_retry_delay_ms: default_read_retry_delay_ms(),
            source_label: default_source_label(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by any of the recognised environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            identification_threshold: env_or(
                "IDENTIFICATION_THRESHOLD",
                defaults.identification_threshold,
            )?,
            reidentification_threshold: env_or(
                "REIDENTIFICATION_THRESHOLD",
                defaults.reidentification_threshold,
            )?,
            max_frames_before_recheck: env_or(
                "MAX_FRAMES_BEFORE_RECHECK",
                defaults.max_frames_before_recheck,
            )?,
            track_eviction_frames: env_or("TRACK_EVICTION_FRAMES", defaults.track_eviction_frames)?,
            processing_width: env_or("PROCESSING_WIDTH", defaults.processing_width)?,
            processing_height: env_or("PROCESSING_HEIGHT", defaults.processing_height)?,
            frame_queue_capacity: env_or("FRAME_QUEUE_CAPACITY", defaults.frame_queue_capacity)?,
            results_queue_capacity: env_or(
                "RESULTS_QUEUE_CAPACITY",
                defaults.results_queue_capacity,
            )?,
            event_queue_capacity: env_or("EVENT_QUEUE_CAPACITY", defaults.event_queue_capacity)?,
            frame_poll_timeout_ms: env_or("FRAME_POLL_TIMEOUT_MS", defaults.frame_poll_timeout_ms)?,
            read_retry_delay_ms: env_or("READ_RETRY_DELAY_MS", defaults.read_retry_delay_ms)?,
            source_label: env::var("SOURCE_LABEL").unwrap_or(defaults.source_label),
        })
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, value) in [
            ("identification_threshold", self.identification_threshold),
            ("reidentification_threshold", self.reidentification_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(PipelineError::invalid_config(format!(
                    "{name} must be within [-1, 1], got {value}"
                )));
            }
        }

        if self.max_frames_before_recheck == 0 {
            return Err(PipelineError::invalid_config(
                "max_frames_before_recheck must be greater than 0",
            ));
        }

        if self.processing_width == 0 || self.processing_height == 0 {
            return Err(PipelineError::invalid_config(format!(
                "processing resolution must be non-zero, got {}x{}",
                self.processing_width, self.processing_height
            )));
        }

        for (name, capacity) in [
            ("frame_queue_capacity", self.frame_queue_capacity),
            ("results_queue_capacity", self.results_queue_capacity),
            ("event_queue_capacity", self.event_queue_capacity),
        ] {
            if capacity == 0 {
                return Err(PipelineError::invalid_config(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.frame_poll_timeout_ms == 0 {
            return Err(PipelineError::invalid_config(
                "frame_poll_timeout_ms must be greater than 0",
            ));
        }

        Ok(())
    }

    pub fn recheck_policy(&self) -> RecheckPolicy {
        RecheckPolicy {
            reidentification_threshold: self.reidentification_threshold,
            max_frames_before_recheck: self.max_frames_before_recheck,
            eviction_after_frames: (self.track_eviction_frames > 0)
                .then_some(self.track_eviction_frames),
        }
    }

    pub fn frame_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_poll_timeout_ms)
    }

    pub fn read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.read_retry_delay_ms)
    }
}

/// Settings for the `surveillance-node` binary
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Directory of frames replayed as the camera feed
    pub frame_source_dir: PathBuf,
    /// Replay interval between frames
    pub frame_interval: Duration,
    /// Gallery root: one subdirectory of `encoding_<n>.npy` files per person
    pub gallery_dir: PathBuf,
    /// JSON-lines detection log (disabled when empty)
    pub event_log_path: Option<PathBuf>,
    /// Latest annotated frame is written here when set
    pub snapshot_path: Option<PathBuf>,
    /// Stop automatically after this long
    pub run_for: Option<Duration>,
    pub pipeline: PipelineConfig,
}

impl NodeConfig {
    pub fn from_env() -> Result<Self> {
        let frame_source_dir = env::var("FRAME_SOURCE_DIR")
            .map(PathBuf::from)
            .context("FRAME_SOURCE_DIR must point to a directory of frames")?;

        let frame_interval = Duration::from_millis(env_or("FRAME_INTERVAL_MS", 40u64)?);

        let gallery_dir = env::var("GALLERY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("face_data"));

        let event_log_path = match env::var("EVENT_LOG_PATH") {
            Ok(path) if path.is_empty() => None,
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => Some(PathBuf::from("logs/detections.jsonl")),
        };

        let snapshot_path = env::var("SNAPSHOT_PATH")
            .ok()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        let run_for = env::var("RUN_SECONDS")
            .ok()
            .map(|v| v.parse::<u64>().context("Invalid RUN_SECONDS"))
            .transpose()?
            .map(Duration::from_secs);

        Ok(Self {
            frame_source_dir,
            frame_interval,
            gallery_dir,
            event_log_path,
            snapshot_path,
            run_for,
            pipeline: PipelineConfig::from_env()?,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key}: {value:?}")),
        Err(_) => Ok(default),
    }
}
