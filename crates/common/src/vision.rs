//! Vision contracts shared by the surveillance pipeline.
//!
//! These types describe what flows between the frame source, the external
//! detector and embedding capabilities, the identity layer, and the sinks
//! that consume annotated frames and detection events.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tracker-assigned identifier, stable while the same object stays tracked
pub type TrackId = u64;

/// Label used for any person that could not be matched against the gallery
pub const UNKNOWN_IDENTITY: &str = "Unknown";

/// Face embedding vector. The dimension is fixed by the extractor and opaque here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Cosine similarity in [-1, 1].
    ///
    /// Mismatched dimensions and zero-length vectors score 0.0 so they never
    /// pass a similarity threshold.
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        if self.len() != other.len() || self.is_empty() {
            return 0.0;
        }

        let norms = self.norm() * other.norm();
        if norms <= f32::EPSILON {
            return 0.0;
        }

        let dot: f32 = self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum();
        (dot / norms).clamp(-1.0, 1.0)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Outcome of resolving a face against the known-face gallery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Identity {
    Known { name: String, similarity: f32 },
    Unknown,
}

impl Identity {
    pub fn known(name: impl Into<String>, similarity: f32) -> Self {
        Self::Known {
            name: name.into(),
            similarity,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Known { name, .. } => name,
            Self::Unknown => UNKNOWN_IDENTITY,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Axis-aligned box in pixel coordinates (top-left origin)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from corner coordinates as reported by most detectors (x1, y1, x2, y2)
    pub fn from_corners(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: x1.abs_diff(x2),
            height: y1.abs_diff(y2),
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Intersect with a `frame_width` x `frame_height` frame.
    ///
    /// Returns `None` when nothing of the box is left inside the frame.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<BoundingBox> {
        if self.x >= frame_width || self.y >= frame_height {
            return None;
        }

        let width = self.width.min(frame_width - self.x);
        let height = self.height.min(frame_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }

        Some(BoundingBox::new(self.x, self.y, width, height))
    }
}

/// One tracked object reported by the detector/tracker for a single frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedDetection {
    pub track_id: TrackId,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Raw frame handed from acquisition to processing
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Monotonic acquisition sequence number (1-based, gaps mean dropped frames)
    pub sequence: u64,
    /// Capture time, Unix epoch milliseconds
    pub captured_at_ms: u64,
    pub image: RgbImage,
}

/// Per-track overlay drawn onto an annotated frame
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOverlay {
    pub track_id: TrackId,
    pub bbox: BoundingBox,
    pub identity: Identity,
    pub confidence: f32,
    pub label: String,
}

/// Frame produced by the processing worker for display sinks
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    /// Acquisition sequence number of the source frame
    pub sequence: u64,
    /// Processing frame index (0-based, contiguous)
    pub frame_index: u64,
    pub image: RgbImage,
    pub overlays: Vec<TrackOverlay>,
    pub fps: f64,
    pub unknown_present: bool,
}

/// Identity sighting emitted once per tracked person per processed frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub person_name: String,
    /// Unix epoch seconds
    pub timestamp: f64,
    pub source_label: String,
    pub track_id: TrackId,
}
