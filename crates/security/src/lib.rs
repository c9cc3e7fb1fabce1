//! Security Lockout
//!
//! Tracks consecutive authentication failures and imposes a cooldown once
//! `max_failed_attempts` is reached. The cooldown starts at the failure that
//! crossed the threshold.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Failures before new sessions are refused
    pub max_failed_attempts: u32,
    /// Cooldown once locked out (seconds)
    pub lockout_duration_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 3,
            lockout_duration_secs: 300,
        }
    }
}

impl SecurityConfig {
    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_duration_secs)
    }
}

/// Result of recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub failed_attempts: u32,
    /// This failure crossed the threshold
    pub lockout_engaged: bool,
}

/// Failure counters. Mutated only through [`LockoutController`].
#[derive(Debug, Clone, Default)]
pub struct SecurityState {
    pub failed_attempts: u32,
    /// Time of the failure that crossed the threshold
    pub last_failure_time: Option<Instant>,
}

impl SecurityState {
    /// Lockout check at `now`; resets the counter once the cooldown elapsed
    pub fn check_allowed(&mut self, now: Instant, max_failed_attempts: u32, lockout: Duration) -> bool {
        if self.failed_attempts < max_failed_attempts {
            return true;
        }
        match self.last_failure_time {
            Some(at) if now.saturating_duration_since(at) < lockout => false,
            _ => {
                self.failed_attempts = 0;
                true
            }
        }
    }

    pub fn record_failure(&mut self, now: Instant, max_failed_attempts: u32) -> FailureOutcome {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        let lockout_engaged = self.failed_attempts == max_failed_attempts;
        if lockout_engaged {
            self.last_failure_time = Some(now);
        }
        FailureOutcome {
            failed_attempts: self.failed_attempts,
            lockout_engaged,
        }
    }

    /// Cooldown left at `now`, if locked out
    pub fn remaining(&self, now: Instant, max_failed_attempts: u32, lockout: Duration) -> Option<Duration> {
        if self.failed_attempts < max_failed_attempts {
            return None;
        }
        let at = self.last_failure_time?;
        let left = lockout.saturating_sub(now.saturating_duration_since(at));
        (!left.is_zero()).then_some(left)
    }
}

/// Serializable view of the lockout state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SecurityStatus {
    pub failed_attempts: u32,
    pub max_failed_attempts: u32,
    pub locked_out: bool,
    pub remaining_secs: u64,
}

/// Process-wide lockout controller, shareable across tasks
#[derive(Debug)]
pub struct LockoutController {
    config: SecurityConfig,
    state: Mutex<SecurityState>,
}

impl LockoutController {
    pub fn new(config: SecurityConfig) -> Self {
        info!(
            max_failed_attempts = config.max_failed_attempts,
            lockout_secs = config.lockout_duration_secs,
            "Creating lockout controller"
        );
        Self {
            config,
            state: Mutex::new(SecurityState::default()),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SecurityState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Whether a new authentication attempt may start
    pub fn check_allowed(&self) -> bool {
        let (max, lockout) = (self.config.max_failed_attempts, self.config.lockout_duration());
        self.with_state(|s| s.check_allowed(Instant::now(), max, lockout))
    }

    /// Record a failed authentication
    pub fn record_failure(&self) -> FailureOutcome {
        let max = self.config.max_failed_attempts;
        let outcome = self.with_state(|s| s.record_failure(Instant::now(), max));
        if outcome.lockout_engaged {
            warn!(
                failed_attempts = outcome.failed_attempts,
                lockout_secs = self.config.lockout_duration_secs,
                "Security lockout engaged"
            );
        } else {
            info!(failed_attempts = outcome.failed_attempts, "Authentication failure recorded");
        }
        outcome
    }

    /// Remaining cooldown, if locked out
    pub fn remaining(&self) -> Option<Duration> {
        let (max, lockout) = (self.config.max_failed_attempts, self.config.lockout_duration());
        self.with_state(|s| s.remaining(Instant::now(), max, lockout))
    }

    pub fn status(&self) -> SecurityStatus {
        let remaining = self.remaining();
        SecurityStatus {
            failed_attempts: self.with_state(|s| s.failed_attempts),
            max_failed_attempts: self.config.max_failed_attempts,
            locked_out: remaining.is_some(),
            remaining_secs: remaining.map(|d| d.as_secs()).unwrap_or(0),
        }
    }

    /// Clear the failure counter (operator action)
    pub fn reset(&self) {
        self.with_state(|s| *s = SecurityState::default());
        info!("Lockout state reset");
    }
}
