//! Eye aspect ratio and blink-sequence detection

use serde::Serialize;

use crate::geometry::{FaceLandmarks, Point};

/// Eye aspect ratio of a 6-point eye contour:
/// `(|p2-p6| + |p3-p5|) / (2 * |p1-p4|)`.
///
/// Returns `None` when the horizontal extent is zero.
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> Option<f32> {
    let a = eye[1].distance(&eye[5]);
    let b = eye[2].distance(&eye[4]);
    let c = eye[0].distance(&eye[3]);
    if c <= f32::EPSILON {
        return None;
    }
    Some((a + b) / (2.0 * c))
}

/// Mean EAR over both eyes
pub fn average_ear(landmarks: &FaceLandmarks) -> Option<f32> {
    let left = eye_aspect_ratio(&landmarks.left_eye)?;
    let right = eye_aspect_ratio(&landmarks.right_eye)?;
    Some((left + right) / 2.0)
}

/// Blink verdict over one window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlinkVerdict {
    /// EAR samples considered
    pub samples: usize,
    /// Samples below the closed-eye threshold
    pub low_samples: usize,
    pub blinked: bool,
}

/// Detects a blink as a mix of closed and open eyes within a window.
#[derive(Debug, Clone, Copy)]
pub struct BlinkDetector {
    ear_threshold: f32,
    min_low_samples: usize,
}

impl BlinkDetector {
    pub fn new(ear_threshold: f32, min_low_samples: usize) -> Self {
        Self {
            ear_threshold,
            min_low_samples,
        }
    }

    /// Evaluate a window of EAR samples (frames without landmarks are
    /// simply absent from `ears`).
    ///
    /// A blink needs at least `min_low_samples` closed-eye samples and at
    /// least one open-eye sample: eyes closed throughout (a photo of a
    /// sleeping face) are not a blink.
    pub fn evaluate(&self, ears: &[f32]) -> BlinkVerdict {
        let low_samples = ears.iter().filter(|ear| **ear < self.ear_threshold).count();
        let all_low = low_samples == ears.len();
        BlinkVerdict {
            samples: ears.len(),
            low_samples,
            blinked: low_samples >= self.min_low_samples && !all_low,
        }
    }

    pub fn ear_threshold(&self) -> f32 {
        self.ear_threshold
    }
}
