//! Frame-difference motion detection

use camera_capture::frame::mean_abs_diff_gray;
use camera_capture::VideoFrame;
use ring_buffer::RingBuffer;
use serde::Serialize;
use tracing::debug;

/// Result of one motion observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotionVerdict {
    /// Mean grayscale difference to the previous frame (None on the first frame)
    pub score: Option<f32>,
    /// This frame moved relative to the previous one
    pub moved: bool,
    /// Any motion within the recent history
    pub recent_motion: bool,
}

/// Stateful motion detector over a stream of frames.
///
/// Keeps the previous grayscale frame and a rolling history of per-frame
/// motion flags. The first frame (no predecessor) never counts as motion.
#[derive(Debug, Clone)]
pub struct MotionDetector {
    threshold: f32,
    previous: Option<(u32, u32, Vec<u8>)>,
    history: RingBuffer<bool>,
    detections: u64,
}

impl MotionDetector {
    pub fn new(threshold: f32, history: usize) -> Self {
        Self {
            threshold,
            previous: None,
            history: RingBuffer::new(history),
            detections: 0,
        }
    }

    /// Feed the next frame
    pub fn observe(&mut self, frame: &VideoFrame) -> MotionVerdict {
        let gray = frame.to_grayscale();
        let previous = self.previous.replace((frame.width, frame.height, gray));

        let score = match (&previous, &self.previous) {
            (Some((pw, ph, prev)), Some((_, _, cur))) if *pw == frame.width && *ph == frame.height => {
                Some(mean_abs_diff_gray(prev, cur))
            }
            _ => None,
        };

        let Some(score) = score else {
            return MotionVerdict {
                score: None,
                moved: false,
                recent_motion: self.history.any(),
            };
        };

        let moved = score > self.threshold;
        self.history.push(moved);
        if moved {
            self.detections += 1;
            debug!(score, threshold = self.threshold, "motion detected");
        }

        MotionVerdict {
            score: Some(score),
            moved,
            recent_motion: self.history.any(),
        }
    }

    /// Frames that showed motion since creation or the last reset
    pub fn detections(&self) -> u64 {
        self.detections
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Forget the previous frame and the history
    pub fn reset(&mut self) {
        self.previous = None;
        self.history.clear();
    }
}
