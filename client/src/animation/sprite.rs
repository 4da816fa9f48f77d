//! Sprite-sheet metadata and frame extraction.

use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One frame's rectangle on the sheet and how long it stays on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    /// Milliseconds.
    #[serde(alias = "durationMs")]
    pub duration: u64,
}

impl Frame {
    /// Zero-length frames would spin the loop; they last at least 1 ms.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpriteMeta {
    pub frames: Vec<Frame>,
    #[serde(default, rename = "loop", alias = "looping")]
    pub looping: bool,
}

impl SpriteMeta {
    /// First frame index that shows the face side of a flip.
    pub fn half_point(&self) -> usize {
        self.frames.len() / 2
    }

    pub fn total_duration(&self) -> Duration {
        self.frames.iter().map(Frame::duration).sum()
    }
}

/// Cut `frame` out of `sheet`. Rectangles reaching past the sheet edge are
/// clipped; a frame entirely outside yields `None`.
pub fn crop(sheet: &RgbaImage, frame: &Frame) -> Option<RgbaImage> {
    let (sw, sh) = sheet.dimensions();
    if frame.x >= sw || frame.y >= sh || frame.w == 0 || frame.h == 0 {
        return None;
    }
    let w = frame.w.min(sw - frame.x);
    let h = frame.h.min(sh - frame.y);
    Some(imageops::crop_imm(sheet, frame.x, frame.y, w, h).to_image())
}
