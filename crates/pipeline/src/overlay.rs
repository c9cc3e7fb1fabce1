//! Decision overlay preview
//!
//! Draws the face box (green when live, red otherwise) on the processed
//! frame and saves it. Purely diagnostic.

use std::path::{Path, PathBuf};

use camera_capture::VideoFrame;
use face_match::FaceBox;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tracing::warn;

use crate::MatchResult;

const LIVE: Rgb<u8> = Rgb([0, 255, 0]);
const NOT_LIVE: Rgb<u8> = Rgb([255, 0, 0]);

/// Frame with the face box drawn two pixels wide
pub fn annotate(frame: &VideoFrame, face: &FaceBox, live: bool) -> Option<RgbImage> {
    let mut image = frame.to_rgb_image()?;
    let color = if live { LIVE } else { NOT_LIVE };
    for inset in 0..2u32 {
        let width = face.width().saturating_sub(2 * inset);
        let height = face.height().saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at((face.left + inset) as i32, (face.top + inset) as i32).of_size(width, height);
        draw_hollow_rect_mut(&mut image, rect, color);
    }
    Some(image)
}

/// Writes the latest decision preview to a fixed path
#[derive(Debug, Clone)]
pub struct PreviewWriter {
    path: PathBuf,
}

impl PreviewWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Failures are logged and otherwise ignored
    pub fn write(&self, result: &MatchResult) {
        let Some(image) = annotate(&result.frame, &result.face_box, result.live) else {
            warn!(sequence = result.sequence, "Preview skipped, frame buffer size mismatch");
            return;
        };
        if let Err(e) = image.save(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Preview write failed");
        }
    }
}
