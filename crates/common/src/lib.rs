pub mod capabilities;
pub mod vision;

pub use capabilities::{Detector, EmbeddingExtractor, FrameSource};
pub use vision::{
    AnnotatedFrame, BoundingBox, DetectionEvent, Embedding, Identity, TrackId, TrackOverlay,
    TrackedDetection, VideoFrame, UNKNOWN_IDENTITY,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current wall-clock time as fractional seconds since the Unix epoch
pub fn unix_timestamp_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn unix_timestamp_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
