//! Liveness configuration

use serde::{Deserialize, Serialize};

use crate::LivenessError;

/// Liveness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Mean inter-frame grayscale difference (0-255) counted as motion
    pub motion_threshold: f32,

    /// Motion samples kept for the any-motion test
    pub motion_history: usize,

    /// Eye aspect ratio below which an eye counts as closed
    pub ear_threshold: f32,

    /// Minimum closed-eye samples in the window for a blink
    pub ear_consec_frames: usize,

    /// Frames in the liveness window
    pub blink_window: usize,

    /// Maximum vertical offset between eye centers (pixels)
    pub head_tilt_threshold: f32,

    /// Maximum horizontal nose/eye-center offset (pixels)
    pub max_horizontal_offset: f32,

    /// Maximum vertical nose/eye-center offset (pixels)
    pub max_vertical_offset: f32,

    /// Posture samples that must all pass
    pub posture_history: usize,

    /// Minimum face size (width, height), inclusive
    pub min_face_size: (u32, u32),

    /// Maximum face size (width, height), inclusive
    pub max_face_size: (u32, u32),

    /// Seconds without any detected face before a timeout is reported
    pub detection_timeout_secs: u64,

    /// Require recent motion in addition to blink and posture
    pub require_motion: bool,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            motion_threshold: 30.0,
            motion_history: 10,
            ear_threshold: 0.25,
            ear_consec_frames: 3,
            blink_window: 5,
            head_tilt_threshold: 10.0,
            max_horizontal_offset: 20.0,
            max_vertical_offset: 30.0,
            posture_history: 5,
            min_face_size: (30, 30),
            max_face_size: (300, 300),
            detection_timeout_secs: 30,
            require_motion: false,
        }
    }
}

impl LivenessConfig {
    /// Create strict config (tighter posture, motion required)
    pub fn strict() -> Self {
        Self {
            head_tilt_threshold: 6.0,
            max_horizontal_offset: 12.0,
            max_vertical_offset: 20.0,
            require_motion: true,
            ..Default::default()
        }
    }

    /// Reject configurations the evaluators cannot satisfy.
    pub fn validate(&self) -> Result<(), LivenessError> {
        if self.blink_window == 0 {
            return Err(LivenessError::Config("blink_window must be at least 1".into()));
        }
        // A blink needs at least one open-eye sample besides the closed ones
        if self.ear_consec_frames >= self.blink_window {
            return Err(LivenessError::Config(format!(
                "ear_consec_frames ({}) must be below blink_window ({})",
                self.ear_consec_frames, self.blink_window
            )));
        }
        if self.min_face_size.0 > self.max_face_size.0 || self.min_face_size.1 > self.max_face_size.1 {
            return Err(LivenessError::Config(format!(
                "min_face_size {:?} exceeds max_face_size {:?}",
                self.min_face_size, self.max_face_size
            )));
        }
        if !(0.0..=255.0).contains(&self.motion_threshold) {
            return Err(LivenessError::Config(format!(
                "motion_threshold {} outside 0-255",
                self.motion_threshold
            )));
        }
        Ok(())
    }
}
