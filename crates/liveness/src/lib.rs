//! Heuristic liveness detection
//!
//! Decides whether a matched face belongs to a live person rather than a
//! photo or screen, using:
//! - Frame-difference motion
//! - Posture (head tilt, frontal orientation, face size)
//! - Blink sequence from the eye aspect ratio

pub mod blink;
pub mod config;
pub mod geometry;
pub mod motion;
pub mod policy;
pub mod posture;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tracker;

pub use blink::{average_ear, eye_aspect_ratio, BlinkDetector, BlinkVerdict};
pub use config::LivenessConfig;
pub use geometry::{FaceBox, FaceLandmarks, Point};
pub use motion::{MotionDetector, MotionVerdict};
pub use policy::{LivenessPolicy, LivenessSignals};
pub use posture::{check_posture, PostureLimits, PostureVerdict};
pub use tracker::{LivenessAssessment, LivenessStats, LivenessTracker, ThresholdUpdate};

use thiserror::Error;

/// Liveness error types
#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("Configuration error: {0}")]
    Config(String),
}
