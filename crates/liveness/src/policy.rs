//! Liveness decision policy

use serde::{Deserialize, Serialize};

/// Signals gathered for one matched face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LivenessSignals {
    /// Face matched an enrolled identity
    pub matched: bool,
    /// Every sample in the posture history passed
    pub posture_stable: bool,
    /// Blink sequence observed in the window
    pub blink: bool,
    /// Any recent frame-to-frame motion (advisory unless required)
    pub recent_motion: bool,
}

/// Combines signals into a live/not-live verdict.
///
/// Live requires a match, stable posture and a blink. Motion is only
/// consulted when `require_motion` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LivenessPolicy {
    pub require_motion: bool,
}

impl LivenessPolicy {
    pub fn new(require_motion: bool) -> Self {
        Self { require_motion }
    }

    pub fn is_live(&self, signals: &LivenessSignals) -> bool {
        signals.matched
            && signals.posture_stable
            && signals.blink
            && (!self.require_motion || signals.recent_motion)
    }
}
