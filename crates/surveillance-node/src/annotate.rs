use crate::glyphs::{draw_text, text_height};
use common::{Identity, TrackOverlay};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const FPS_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

const BOX_THICKNESS: u32 = 2;
const TEXT_SCALE: u32 = 2;
const LABEL_GAP: u32 = 2;
const FPS_MARGIN: i64 = 10;

/// `ID:<track> <name> (<confidence>)`
pub fn overlay_label(overlay: &TrackOverlay) -> String {
    format!(
        "ID:{} {} ({:.2})",
        overlay.track_id,
        overlay.identity.name(),
        overlay.confidence
    )
}

pub fn overlay_color(identity: &Identity) -> Rgb<u8> {
    if identity.is_unknown() {
        UNKNOWN_COLOR
    } else {
        KNOWN_COLOR
    }
}

/// Draw each overlay's bounding box and label onto `image`.
/// Boxes are clipped to the image; degenerate boxes are skipped.
/// The label sits above the box, or below it when the box touches the top edge.
pub fn draw_overlays(image: &mut RgbImage, overlays: &[TrackOverlay]) {
    let (width, height) = image.dimensions();
    for overlay in overlays {
        let Some(bbox) = overlay.bbox.clamp_to(width, height) else {
            continue;
        };
        let color = overlay_color(&overlay.identity);

        for inset in 0..BOX_THICKNESS {
            let w = bbox.width.saturating_sub(inset * 2);
            let h = bbox.height.saturating_sub(inset * 2);
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at((bbox.x + inset) as i32, (bbox.y + inset) as i32).of_size(w, h);
            draw_hollow_rect_mut(image, rect, color);
        }

        let label_height = text_height(TEXT_SCALE) + LABEL_GAP;
        let label_y = if bbox.y >= label_height {
            bbox.y - label_height
        } else {
            bbox.y + bbox.height + LABEL_GAP
        };
        draw_text(
            image,
            i64::from(bbox.x),
            i64::from(label_y),
            &overlay.label,
            color,
            TEXT_SCALE,
        );
    }
}

/// Draw the processing rate in the top-left corner
pub fn draw_fps(image: &mut RgbImage, fps: f64) {
    draw_text(
        image,
        FPS_MARGIN,
        FPS_MARGIN,
        &format!("FPS: {fps:.1}"),
        FPS_COLOR,
        TEXT_SCALE,
    );
}

/// Frames-per-second over a sliding window of recent frame timestamps
#[derive(Debug)]
pub struct FpsMeter {
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl FpsMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            stamps: VecDeque::new(),
        }
    }

    /// Record a frame completed at `now` and return the current rate
    pub fn tick(&mut self, now: Instant) -> f64 {
        self.stamps.push_back(now);
        while let Some(oldest) = self.stamps.front() {
            if now.duration_since(*oldest) > self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
        self.fps()
    }

    pub fn fps(&self) -> f64 {
        match (self.stamps.front(), self.stamps.back()) {
            (Some(first), Some(last)) if self.stamps.len() > 1 => {
                let span = last.duration_since(*first).as_secs_f64();
                if span > 0.0 {
                    (self.stamps.len() - 1) as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
