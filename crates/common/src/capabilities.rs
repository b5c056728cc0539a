//! Narrow interfaces to the external collaborators of the pipeline.
//!
//! Model-backed detectors, face embedders and camera readers live outside this
//! workspace; they plug in by implementing these traits. The scripted fakes in
//! `surveillance_node::mock` implement them for tests and demos.

use crate::vision::{Embedding, TrackedDetection};
use anyhow::Result;
use async_trait::async_trait;
use image::RgbImage;

/// Object detector with a persistent tracker behind it
#[async_trait]
pub trait Detector: Send {
    /// Detect people in `frame` and return them with track IDs that stay
    /// stable across calls while the same object remains tracked.
    async fn detect_and_track(&mut self, frame: &RgbImage) -> Result<Vec<TrackedDetection>>;
}

/// Face embedding model
#[async_trait]
pub trait EmbeddingExtractor: Send + Sync {
    /// Extract an embedding from an image region, or `None` if it holds no face
    async fn extract(&self, region: &RgbImage) -> Result<Option<Embedding>>;
}

/// Camera, stream or file-backed frame supplier
#[async_trait]
pub trait FrameSource: Send {
    /// Human-readable description used in logs
    fn describe(&self) -> String;

    /// Acquire the underlying device or stream. Failure here is fatal for the pipeline.
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read the next frame. `Ok(None)` means nothing is available right now
    /// (end of stream, device not ready); callers retry after a short pause.
    async fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Release the underlying device or stream
    async fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
