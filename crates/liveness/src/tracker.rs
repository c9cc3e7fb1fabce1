//! Per-worker liveness state

use std::time::{Duration, Instant};

use camera_capture::VideoFrame;
use ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::blink::{average_ear, BlinkDetector, BlinkVerdict};
use crate::config::LivenessConfig;
use crate::geometry::{FaceBox, FaceLandmarks};
use crate::motion::{MotionDetector, MotionVerdict};
use crate::policy::{LivenessPolicy, LivenessSignals};
use crate::posture::{check_posture, PostureLimits};

/// Outcome of assessing one matched face against its window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LivenessAssessment {
    pub signals: LivenessSignals,
    pub blink: BlinkVerdict,
    pub live: bool,
}

/// Tracker counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LivenessStats {
    pub motion_detections: u64,
    pub posture_violations: u64,
    pub assessments: u64,
    pub live_verdicts: u64,
    /// Seconds since a face was last seen (or since reset)
    pub secs_since_detection: f64,
}

/// Runtime threshold adjustments; `None` leaves a value unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdUpdate {
    pub motion_threshold: Option<f32>,
    pub head_tilt_threshold: Option<f32>,
    /// Match acceptance distance for the worker owning this tracker
    pub face_distance_threshold: Option<f32>,
}

/// Stateful liveness evaluator owned by a single worker.
///
/// Holds the motion detector, the posture history and counters. Not shared
/// across threads; each worker builds its own.
#[derive(Debug)]
pub struct LivenessTracker {
    motion: MotionDetector,
    blink: BlinkDetector,
    limits: PostureLimits,
    posture_history: RingBuffer<bool>,
    policy: LivenessPolicy,
    detection_timeout: Duration,
    /// Overrides the configured match distance once set
    distance_threshold: Option<f32>,
    last_detection: Instant,
    posture_violations: u64,
    assessments: u64,
    live_verdicts: u64,
}

impl LivenessTracker {
    pub fn new(config: &LivenessConfig) -> Self {
        Self {
            motion: MotionDetector::new(config.motion_threshold, config.motion_history),
            blink: BlinkDetector::new(config.ear_threshold, config.ear_consec_frames),
            limits: PostureLimits::from(config),
            posture_history: RingBuffer::new(config.posture_history),
            policy: LivenessPolicy::new(config.require_motion),
            detection_timeout: Duration::from_secs(config.detection_timeout_secs),
            distance_threshold: None,
            last_detection: Instant::now(),
            posture_violations: 0,
            assessments: 0,
            live_verdicts: 0,
        }
    }

    /// Feed every processed frame to the motion detector
    pub fn observe_frame(&mut self, frame: &VideoFrame) -> MotionVerdict {
        self.motion.observe(frame)
    }

    /// Record that a face was seen
    pub fn note_detection(&mut self) {
        self.last_detection = Instant::now();
    }

    /// Assess a face given its landmarks in each window frame.
    ///
    /// Frames where landmarks could not be extracted are `None`; they add
    /// neither EAR nor posture samples. Each landmark set contributes one
    /// posture sample to the rolling history.
    pub fn assess(
        &mut self,
        window: &[Option<FaceLandmarks>],
        face: Option<&FaceBox>,
        matched: bool,
        recent_motion: bool,
    ) -> LivenessAssessment {
        self.assessments += 1;

        let mut ears = Vec::with_capacity(window.len());
        for landmarks in window.iter().flatten() {
            if let Some(ear) = average_ear(landmarks) {
                ears.push(ear);
            }

            let posture = check_posture(landmarks, face, &self.limits);
            if !posture.passed() {
                self.posture_violations += 1;
                debug!(
                    head_tilt_ok = posture.head_tilt_ok,
                    orientation_ok = posture.orientation_ok,
                    face_size_ok = posture.face_size_ok,
                    "incorrect posture"
                );
            }
            self.posture_history.push(posture.passed());
        }

        let blink = self.blink.evaluate(&ears);
        let signals = LivenessSignals {
            matched,
            posture_stable: self.posture_history.all(),
            blink: blink.blinked,
            recent_motion,
        };
        let live = self.policy.is_live(&signals);
        if live {
            self.live_verdicts += 1;
        }

        debug!(
            matched,
            posture_stable = signals.posture_stable,
            low_ear = blink.low_samples,
            ear_samples = blink.samples,
            live,
            "liveness assessed"
        );

        LivenessAssessment {
            signals,
            blink,
            live,
        }
    }

    /// True if no face has been seen for longer than the detection timeout
    pub fn timed_out(&self) -> bool {
        let timed_out = self.last_detection.elapsed() > self.detection_timeout;
        if timed_out {
            warn!(timeout_secs = self.detection_timeout.as_secs(), "detection timeout");
        }
        timed_out
    }

    /// Clear motion and posture history and restart the timeout clock
    pub fn reset(&mut self) {
        self.motion.reset();
        self.posture_history.clear();
        self.last_detection = Instant::now();
    }

    pub fn statistics(&self) -> LivenessStats {
        LivenessStats {
            motion_detections: self.motion.detections(),
            posture_violations: self.posture_violations,
            assessments: self.assessments,
            live_verdicts: self.live_verdicts,
            secs_since_detection: self.last_detection.elapsed().as_secs_f64(),
        }
    }

    pub fn update_thresholds(&mut self, update: ThresholdUpdate) {
        if let Some(threshold) = update.motion_threshold {
            self.motion.set_threshold(threshold);
        }
        if let Some(threshold) = update.head_tilt_threshold {
            self.limits.head_tilt = threshold;
        }
        match update.face_distance_threshold {
            Some(threshold) if threshold > 0.0 && threshold.is_finite() => {
                self.distance_threshold = Some(threshold);
            }
            Some(threshold) => warn!(threshold, "ignoring non-positive face distance threshold"),
            None => {}
        }
        info!(
            motion_threshold = self.motion.threshold(),
            head_tilt_threshold = self.limits.head_tilt,
            face_distance_threshold = ?self.distance_threshold,
            "liveness thresholds updated"
        );
    }

    /// Match distance to use instead of the configured one, if updated
    pub fn distance_threshold(&self) -> Option<f32> {
        self.distance_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{blink_window, frontal_landmarks};

    fn tracker() -> LivenessTracker {
        LivenessTracker::new(&LivenessConfig::default())
    }

    fn face() -> FaceBox {
        FaceBox::new(50, 200, 150, 100)
    }

    #[test]
    fn test_blink_window_with_match_is_live() {
        let mut tracker = tracker();
        let assessment = tracker.assess(&blink_window(), Some(&face()), true, false);
        assert!(assessment.signals.blink);
        assert!(assessment.signals.posture_stable);
        assert!(assessment.live);
        assert_eq!(tracker.statistics().live_verdicts, 1);
    }

    #[test]
    fn test_unmatched_face_never_live() {
        let mut tracker = tracker();
        let assessment = tracker.assess(&blink_window(), Some(&face()), false, true);
        assert!(assessment.signals.blink);
        assert!(!assessment.live);
    }

    #[test]
    fn test_open_eyes_throughout_not_live() {
        let mut tracker = tracker();
        let window: Vec<_> = (0..5).map(|_| Some(frontal_landmarks(0.3))).collect();
        assert!(!tracker.assess(&window, Some(&face()), true, false).live);
    }

    #[test]
    fn test_posture_violation_poisons_history() {
        let mut tracker = tracker();
        let mut window = blink_window();
        if let Some(Some(landmarks)) = window.get_mut(2) {
            for p in landmarks.nose_bridge.iter_mut() {
                p.x += 40.0;
            }
        }
        let assessment = tracker.assess(&window, Some(&face()), true, false);
        assert!(!assessment.signals.posture_stable);
        assert!(!assessment.live);
        assert_eq!(tracker.statistics().posture_violations, 1);

        // A clean window evicts the bad sample
        assert!(tracker.assess(&blink_window(), Some(&face()), true, false).live);
    }

    #[test]
    fn test_missing_landmarks_contribute_nothing() {
        let mut tracker = tracker();
        let assessment = tracker.assess(&[None, None, None], Some(&face()), true, false);
        assert_eq!(assessment.blink.samples, 0);
        assert!(!assessment.signals.posture_stable);
        assert!(!assessment.live);
    }

    #[test]
    fn test_oversized_face_fails_posture() {
        let mut tracker = tracker();
        let huge = FaceBox::new(0, 400, 400, 0);
        assert!(!tracker.assess(&blink_window(), Some(&huge), true, false).live);
    }

    #[test]
    fn test_update_thresholds() {
        let mut tracker = tracker();
        tracker.update_thresholds(ThresholdUpdate {
            head_tilt_threshold: Some(0.0),
            ..Default::default()
        });
        // Nothing is strictly below zero tilt
        assert!(!tracker.assess(&blink_window(), Some(&face()), true, false).live);
    }

    #[test]
    fn test_face_distance_threshold_update() {
        let mut tracker = tracker();
        assert_eq!(tracker.distance_threshold(), None);

        tracker.update_thresholds(ThresholdUpdate {
            face_distance_threshold: Some(0.45),
            ..Default::default()
        });
        assert_eq!(tracker.distance_threshold(), Some(0.45));

        tracker.update_thresholds(ThresholdUpdate {
            face_distance_threshold: Some(-1.0),
            ..Default::default()
        });
        assert_eq!(tracker.distance_threshold(), Some(0.45));
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_posture_violation_is_debug_only() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let mut tracker = tracker();
        let huge = FaceBox::new(0, 400, 400, 0);
        tracing::subscriber::with_default(subscriber, || {
            tracker.assess(&blink_window(), Some(&huge), true, false);
        });

        assert!(tracker.statistics().posture_violations > 0);
        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(!logs.contains("incorrect posture"), "{logs}");
    }

    #[test]
    fn test_timeout_and_reset() {
        let mut tracker = LivenessTracker::new(&LivenessConfig {
            detection_timeout_secs: 0,
            ..Default::default()
        });
        std::thread::sleep(Duration::from_millis(5));
        assert!(tracker.timed_out());
        tracker.reset();
        tracker.note_detection();
        assert!(tracker.statistics().secs_since_detection < 1.0);
    }
}
