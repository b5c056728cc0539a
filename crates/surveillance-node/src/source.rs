use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use common::FrameSource;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Replays the image files of a directory, in file-name order, as a camera feed
#[derive(Debug)]
pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    looping: bool,
    frame_interval: Option<Duration>,
}

impl ImageSequenceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            cursor: 0,
            looping: false,
            frame_interval: None,
        }
    }

    /// Start again from the first file after the last one
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Pace reads to one frame per `interval`
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

#[async_trait]
impl FrameSource for ImageSequenceSource {
    fn describe(&self) -> String {
        format!("image sequence {}", self.dir.display())
    }

    async fn open(&mut self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Cannot read frame directory {}", self.dir.display()))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && is_image_file(&path) {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            bail!("No image files found in {}", self.dir.display());
        }

        info!(dir = %self.dir.display(), frames = files.len(), "Opened image sequence");
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.files.is_empty() {
            return Ok(None);
        }
        if self.cursor >= self.files.len() {
            if !self.looping {
                return Ok(None);
            }
            self.cursor = 0;
        }

        if let Some(interval) = self.frame_interval {
            tokio::time::sleep(interval).await;
        }

        let path = &self.files[self.cursor];
        self.cursor += 1;

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let image = image::load_from_memory(&bytes)
            .with_context(|| format!("Failed to decode {}", path.display()))?;
        Ok(Some(image.to_rgb8()))
    }

    async fn release(&mut self) -> Result<()> {
        self.files.clear();
        self.cursor = 0;
        Ok(())
    }
}
