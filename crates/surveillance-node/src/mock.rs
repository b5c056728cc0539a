//! Scripted stand-ins for the model-backed capabilities.
//!
//! Used by the test suites and by the binary when no real detector or face
//! embedder is wired in.

use crate::alerting::{AlertNotifier, UnknownPersonAlert};
use anyhow::{bail, Result};
use async_trait::async_trait;
use common::{
    BoundingBox, Detector, Embedding, EmbeddingExtractor, FrameSource, Identity, TrackId,
    TrackedDetection,
};
use identity::IdentityResolver;
use image::{Rgb, RgbImage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Replays a fixed list of per-frame detections.
///
/// Call `n` returns entry `n` of the script; once the script runs out the
/// last entry repeats. Calls listed in `failing_calls` return an error.
#[derive(Debug, Default)]
pub struct ScriptedDetector {
    script: Vec<Vec<TrackedDetection>>,
    failing_calls: HashSet<usize>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<TrackedDetection>>) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    /// The same detections on every frame
    pub fn fixed(detections: Vec<TrackedDetection>) -> Self {
        Self::new(vec![detections])
    }

    pub fn with_failing_calls(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.failing_calls.extend(calls);
        self
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect_and_track(&mut self, _frame: &RgbImage) -> Result<Vec<TrackedDetection>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_calls.contains(&call) {
            bail!("scripted detector failure on call {call}");
        }
        Ok(self
            .script
            .get(call)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or_default())
    }
}

/// One person standing in the middle of the frame, always with the same track ID
#[derive(Debug, Clone)]
pub struct MockPersonDetector {
    track_id: TrackId,
    confidence: f32,
}

impl MockPersonDetector {
    pub fn centered(track_id: TrackId) -> Self {
        Self {
            track_id,
            confidence: 0.9,
        }
    }
}

#[async_trait]
impl Detector for MockPersonDetector {
    async fn detect_and_track(&mut self, frame: &RgbImage) -> Result<Vec<TrackedDetection>> {
        let (width, height) = frame.dimensions();
        if width < 4 || height < 4 {
            return Ok(Vec::new());
        }
        Ok(vec![TrackedDetection {
            track_id: self.track_id,
            bbox: BoundingBox::new(width / 4, height / 4, width / 2, height / 2),
            confidence: self.confidence,
        }])
    }
}

/// Returns embeddings from a script in call order, repeating the last entry.
/// `None` entries model crops without a face.
#[derive(Debug, Default)]
pub struct ScriptedExtractor {
    script: Vec<Option<Embedding>>,
    failing_calls: HashSet<usize>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedExtractor {
    pub fn new(script: Vec<Option<Embedding>>) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    pub fn fixed(embedding: impl Into<Embedding>) -> Self {
        Self::new(vec![Some(embedding.into())])
    }

    pub fn with_failing_calls(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.failing_calls.extend(calls);
        self
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl EmbeddingExtractor for ScriptedExtractor {
    async fn extract(&self, _region: &RgbImage) -> Result<Option<Embedding>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_calls.contains(&call) {
            bail!("scripted extractor failure on call {call}");
        }
        Ok(self
            .script
            .get(call)
            .or_else(|| self.script.last())
            .cloned()
            .flatten())
    }
}

/// Embeds a region as its mean colour, so solid-colour frames map to fixed vectors
#[derive(Debug, Default, Clone, Copy)]
pub struct MeanColorExtractor;

#[async_trait]
impl EmbeddingExtractor for MeanColorExtractor {
    async fn extract(&self, region: &RgbImage) -> Result<Option<Embedding>> {
        let pixels = u64::from(region.width()) * u64::from(region.height());
        if pixels == 0 {
            return Ok(None);
        }

        let mut sums = [0u64; 3];
        for pixel in region.pixels() {
            for (sum, channel) in sums.iter_mut().zip(pixel.0) {
                *sum += u64::from(channel);
            }
        }
        let mean: Vec<f32> = sums
            .iter()
            .map(|sum| (*sum as f64 / pixels as f64 / 255.0) as f32)
            .collect();

        let embedding = Embedding::new(mean);
        if embedding.norm() == 0.0 {
            // black crop
            return Ok(None);
        }
        Ok(Some(embedding))
    }
}

/// Delegates to another resolver and counts the calls
pub struct CountingResolver {
    inner: Box<dyn IdentityResolver>,
    calls: AtomicUsize,
}

impl CountingResolver {
    pub fn new(inner: impl IdentityResolver + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IdentityResolver for CountingResolver {
    fn resolve(&self, embedding: &Embedding) -> Identity {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(embedding)
    }
}

/// Keeps every alert it receives
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<UnknownPersonAlert>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<UnknownPersonAlert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AlertNotifier for RecordingNotifier {
    async fn notify(&self, alert: &UnknownPersonAlert) -> Result<()> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert.clone());
        Ok(())
    }

    fn channel(&self) -> &'static str {
        "recording"
    }
}

#[derive(Debug)]
enum SourceScript {
    Frames { images: Vec<RgbImage>, looping: bool },
    Failing,
    Empty,
}

/// In-memory frame source with optional pacing and failure modes
#[derive(Debug)]
pub struct ScriptedFrameSource {
    script: SourceScript,
    cursor: usize,
    interval: Option<Duration>,
    open_error: Option<String>,
    reads: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl ScriptedFrameSource {
    fn with_script(script: SourceScript) -> Self {
        Self {
            script,
            cursor: 0,
            interval: None,
            open_error: None,
            reads: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Endless frames of a single colour
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::with_script(SourceScript::Frames {
            images: vec![RgbImage::from_pixel(width, height, Rgb(rgb))],
            looping: true,
        })
    }

    /// The given frames once, then nothing
    pub fn from_images(images: Vec<RgbImage>) -> Self {
        Self::with_script(SourceScript::Frames {
            images,
            looping: false,
        })
    }

    /// Every read fails
    pub fn failing() -> Self {
        Self::with_script(SourceScript::Failing)
    }

    /// Every read comes back empty
    pub fn empty() -> Self {
        Self::with_script(SourceScript::Empty)
    }

    pub fn with_open_error(mut self, message: impl Into<String>) -> Self {
        self.open_error = Some(message.into());
        self
    }

    /// Wait this long before each read, like a camera running at a fixed rate
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }

    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        self.releases.clone()
    }
}

#[async_trait]
impl FrameSource for ScriptedFrameSource {
    fn describe(&self) -> String {
        let mode = match &self.script {
            SourceScript::Frames { images, .. } => format!("{} frame(s)", images.len()),
            SourceScript::Failing => "failing".to_string(),
            SourceScript::Empty => "empty".to_string(),
        };
        format!("scripted source ({mode})")
    }

    async fn open(&mut self) -> Result<()> {
        match &self.open_error {
            Some(message) => bail!("{message}"),
            None => Ok(()),
        }
    }

    async fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(interval) = self.interval {
            tokio::time::sleep(interval).await;
        }

        match &self.script {
            SourceScript::Failing => bail!("device not readable"),
            SourceScript::Empty => Ok(None),
            SourceScript::Frames { images, looping } => {
                if images.is_empty() {
                    return Ok(None);
                }
                let index = if *looping {
                    self.cursor % images.len()
                } else if self.cursor < images.len() {
                    self.cursor
                } else {
                    return Ok(None);
                };
                self.cursor += 1;
                Ok(Some(images[index].clone()))
            }
        }
    }

    async fn release(&mut self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(track_id: TrackId) -> TrackedDetection {
        TrackedDetection {
            track_id,
            bbox: BoundingBox::new(0, 0, 2, 2),
            confidence: 0.8,
        }
    }

    #[tokio::test]
    async fn test_scripted_detector_repeats_last_and_fails_on_request() {
        let mut detector =
            ScriptedDetector::new(vec![vec![detection(1)], vec![detection(2)]]).with_failing_calls([1]);
        let frame = RgbImage::new(4, 4);

        assert_eq!(detector.detect_and_track(&frame).await.unwrap()[0].track_id, 1);
        assert!(detector.detect_and_track(&frame).await.is_err());
        assert_eq!(detector.detect_and_track(&frame).await.unwrap()[0].track_id, 2);
        assert_eq!(detector.call_counter().load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_mean_color_extractor() {
        let region = RgbImage::from_pixel(3, 3, Rgb([255, 0, 0]));
        let embedding = MeanColorExtractor.extract(&region).await.unwrap().unwrap();
        assert_eq!(embedding.as_slice(), &[1.0, 0.0, 0.0]);

        let black = RgbImage::new(3, 3);
        assert!(MeanColorExtractor.extract(&black).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_source_from_images_ends() {
        let mut source = ScriptedFrameSource::from_images(vec![RgbImage::new(2, 2)]);
        assert!(source.next_frame().await.unwrap().is_some());
        assert!(source.next_frame().await.unwrap().is_none());
        assert_eq!(source.read_counter().load(Ordering::SeqCst), 2);

        let mut failing = ScriptedFrameSource::empty().with_open_error("no camera");
        assert!(failing.open().await.is_err());
    }
}
