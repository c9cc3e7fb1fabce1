//! Posture checks: head tilt, frontal orientation, face size

use serde::Serialize;

use crate::config::LivenessConfig;
use crate::geometry::{FaceBox, FaceLandmarks, Point};

/// Posture thresholds (subset of [`LivenessConfig`])
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostureLimits {
    pub head_tilt: f32,
    pub max_horizontal_offset: f32,
    pub max_vertical_offset: f32,
    pub min_face_size: (u32, u32),
    pub max_face_size: (u32, u32),
}

impl From<&LivenessConfig> for PostureLimits {
    fn from(config: &LivenessConfig) -> Self {
        Self {
            head_tilt: config.head_tilt_threshold,
            max_horizontal_offset: config.max_horizontal_offset,
            max_vertical_offset: config.max_vertical_offset,
            min_face_size: config.min_face_size,
            max_face_size: config.max_face_size,
        }
    }
}

/// Posture check outcome for one face sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PostureVerdict {
    pub head_tilt_ok: bool,
    pub orientation_ok: bool,
    pub face_size_ok: bool,
    /// Vertical offset between eye centers
    pub eye_level_diff: f32,
}

impl PostureVerdict {
    pub fn passed(&self) -> bool {
        self.head_tilt_ok && self.orientation_ok && self.face_size_ok
    }

    const FAILED: PostureVerdict = PostureVerdict {
        head_tilt_ok: false,
        orientation_ok: false,
        face_size_ok: false,
        eye_level_diff: f32::NAN,
    };
}

/// Eye centers level within `threshold` pixels (strict)
pub fn head_tilt_ok(left_eye: Point, right_eye: Point, threshold: f32) -> bool {
    (left_eye.y - right_eye.y).abs() < threshold
}

/// Nose tip close to the midpoint of the eye centers (strict bounds)
pub fn orientation_ok(nose_tip: Point, left_eye: Point, right_eye: Point, limits: &PostureLimits) -> bool {
    let center = Point::new((left_eye.x + right_eye.x) / 2.0, (left_eye.y + right_eye.y) / 2.0);
    (center.x - nose_tip.x).abs() < limits.max_horizontal_offset
        && (center.y - nose_tip.y).abs() < limits.max_vertical_offset
}

/// Face box within size bounds (inclusive on both ends)
pub fn face_size_ok(face: &FaceBox, min: (u32, u32), max: (u32, u32)) -> bool {
    let (w, h) = (face.width(), face.height());
    (min.0..=max.0).contains(&w) && (min.1..=max.1).contains(&h)
}

/// Run all posture checks on one landmark set.
///
/// Without a face box the size check passes. Landmarks with an empty nose
/// bridge fail every check.
pub fn check_posture(landmarks: &FaceLandmarks, face: Option<&FaceBox>, limits: &PostureLimits) -> PostureVerdict {
    let Some(nose_tip) = landmarks.nose_tip() else {
        return PostureVerdict::FAILED;
    };

    let left = landmarks.left_eye_center();
    let right = landmarks.right_eye_center();

    PostureVerdict {
        head_tilt_ok: head_tilt_ok(left, right, limits.head_tilt),
        orientation_ok: orientation_ok(nose_tip, left, right, limits),
        face_size_ok: face
            .map(|f| face_size_ok(f, limits.min_face_size, limits.max_face_size))
            .unwrap_or(true),
        eye_level_diff: (left.y - right.y).abs(),
    }
}
