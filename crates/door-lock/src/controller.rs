//! Door lock state machine

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::hardware::{DigitalInput, DigitalOutput, InterruptSource, Level, Subscription};
use crate::{DoorConfig, HardwareError, LockError, LockState};

/// Actuator level that holds the door locked
const LOCKED_LEVEL: Level = Level::High;
const UNLOCKED_LEVEL: Level = Level::Low;

/// Delay between relock retries after an actuator failure
const RELOCK_RETRY: Duration = Duration::from_secs(1);

/// Consistent snapshot of the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoorStatus {
    pub state: LockState,
    pub locked: bool,
    pub emergency: bool,
    pub last_unlock_time: Option<DateTime<Utc>>,
    pub unlock_count: u64,
    /// Door sensor level (None if the read failed)
    pub sensor: Option<Level>,
    pub emergency_since: Option<DateTime<Utc>>,
    /// Emergency has lasted longer than the configured timeout
    pub emergency_timeout_exceeded: bool,
    pub relock_pending: bool,
}

struct Inner {
    state: LockState,
    last_unlock_time: Option<DateTime<Utc>>,
    unlock_count: u64,
    emergency_since: Option<DateTime<Utc>>,
    emergency_timeout_exceeded: bool,
    /// Bumped on every transition; a relock only applies to its own generation
    generation: u64,
    relock: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
    lock_pin: Box<dyn DigitalOutput>,
    sensor: Box<dyn DigitalInput>,
}

impl Inner {
    fn cancel_relock(&mut self) {
        if let Some(task) = self.relock.take() {
            task.abort();
        }
    }

    fn cancel_watchdog(&mut self) {
        if let Some(task) = self.watchdog.take() {
            task.abort();
        }
    }
}

/// Authoritative controller for the physical lock.
///
/// All state lives behind one mutex that is only held across inspection,
/// mutation and the (fast) pin write. Relock and the emergency watchdog are
/// tokio tasks scheduled outside the critical section.
pub struct DoorLockController {
    config: DoorConfig,
    inner: Arc<Mutex<Inner>>,
    runtime: Handle,
    interrupt: Mutex<Option<Subscription>>,
}

fn guard(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    match inner.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl DoorLockController {
    /// Create the controller and drive the actuator to locked.
    ///
    /// Must be called within a tokio runtime. A failing initial write is a
    /// setup error.
    pub fn new(
        config: DoorConfig,
        mut lock_pin: Box<dyn DigitalOutput>,
        sensor: Box<dyn DigitalInput>,
    ) -> Result<Arc<Self>, LockError> {
        let runtime = Handle::try_current()
            .map_err(|e| HardwareError::Setup(format!("door controller needs a tokio runtime: {e}")))?;

        lock_pin
            .write(LOCKED_LEVEL)
            .map_err(|e| HardwareError::Setup(format!("initial lock failed: {e}")))?;

        info!(
            lock_pin = config.lock_pin,
            sensor_pin = config.sensor_pin,
            max_unlock_secs = config.max_unlock_duration_secs,
            "Door lock controller ready"
        );

        Ok(Arc::new(Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: LockState::Locked,
                last_unlock_time: None,
                unlock_count: 0,
                emergency_since: None,
                emergency_timeout_exceeded: false,
                generation: 0,
                relock: None,
                watchdog: None,
                lock_pin,
                sensor,
            })),
            runtime,
            interrupt: Mutex::new(None),
        }))
    }

    /// Route the emergency button's interrupts to [`Self::emergency_override`]
    pub fn attach_emergency(self: &Arc<Self>, source: &mut dyn InterruptSource) -> Result<(), LockError> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let subscription = source
            .on_edge(
                self.config.emergency_edge,
                self.config.debounce(),
                Box::new(move || {
                    if let Some(controller) = weak.upgrade() {
                        warn!("Emergency button pressed");
                        controller.emergency_override();
                    }
                }),
            )
            .map_err(|e| HardwareError::Setup(format!("emergency interrupt: {e}")))?;

        let mut slot = match self.interrupt.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(subscription);
        info!(pin = self.config.emergency_pin, "Emergency override armed");
        Ok(())
    }

    pub fn config(&self) -> &DoorConfig {
        &self.config
    }

    /// Unlock and schedule a relock after `min(duration, max_unlock_duration)`
    pub fn unlock(&self, duration: Duration) -> Result<(), LockError> {
        let hold = duration.min(self.config.max_unlock_duration());
        let mut inner = guard(&self.inner);

        match inner.state {
            LockState::Emergency => {
                warn!("Unlock attempted during emergency mode");
                return Err(LockError::EmergencyActive);
            }
            LockState::Unlocked => {
                return Err(LockError::InvalidTransition {
                    from: LockState::Unlocked,
                })
            }
            LockState::Locked => {}
        }

        if let Err(e) = inner.lock_pin.write(UNLOCKED_LEVEL) {
            error!(error = %e, "Door unlock failed");
            return Err(e.into());
        }

        inner.state = LockState::Unlocked;
        inner.last_unlock_time = Some(Utc::now());
        inner.unlock_count += 1;
        inner.generation += 1;
        inner.cancel_relock();

        let generation = inner.generation;
        let shared = Arc::clone(&self.inner);
        inner.relock = Some(self.runtime.spawn(relock_after(shared, generation, hold)));

        metrics::counter!("faceguard_door_unlocks_total").increment(1);
        info!(
            unlock_count = inner.unlock_count,
            hold_secs = hold.as_secs_f32(),
            "Door unlocked"
        );
        Ok(())
    }

    /// Lock now, cancelling any pending relock
    pub fn lock(&self) -> Result<(), LockError> {
        let mut inner = guard(&self.inner);
        match inner.state {
            LockState::Emergency => return Err(LockError::EmergencyActive),
            LockState::Locked => {
                return Err(LockError::InvalidTransition {
                    from: LockState::Locked,
                })
            }
            LockState::Unlocked => {}
        }

        if let Err(e) = inner.lock_pin.write(LOCKED_LEVEL) {
            error!(error = %e, "Door lock failed");
            return Err(e.into());
        }

        inner.state = LockState::Locked;
        inner.generation += 1;
        inner.cancel_relock();
        info!("Door locked");
        Ok(())
    }

    /// Force the door open and enter emergency mode.
    ///
    /// Always succeeds: a failing actuator write is logged and the state is
    /// still forced to `Emergency`. Safe to call from an interrupt thread.
    pub fn emergency_override(&self) {
        let mut inner = guard(&self.inner);
        inner.cancel_relock();
        inner.generation += 1;

        let already = inner.state == LockState::Emergency;
        inner.state = LockState::Emergency;

        if let Err(e) = inner.lock_pin.write(UNLOCKED_LEVEL) {
            error!(error = %e, "Emergency unlock write failed, state forced to emergency");
        }
        inner.last_unlock_time = Some(Utc::now());
        inner.unlock_count += 1;

        if !already {
            inner.emergency_since = Some(Utc::now());
            inner.emergency_timeout_exceeded = false;
            inner.cancel_watchdog();
            let shared = Arc::clone(&self.inner);
            let timeout = self.config.emergency_timeout();
            inner.watchdog = Some(self.runtime.spawn(emergency_watchdog(shared, timeout)));
        }
        warn!(unlock_count = inner.unlock_count, "Emergency override activated");
    }

    /// Leave emergency mode and relock.
    ///
    /// If the actuator cannot be driven to locked the controller stays in
    /// `Emergency`.
    pub fn reset_emergency_mode(&self) -> Result<(), LockError> {
        let mut inner = guard(&self.inner);
        if inner.state != LockState::Emergency {
            return Err(LockError::InvalidTransition { from: inner.state });
        }

        if let Err(e) = inner.lock_pin.write(LOCKED_LEVEL) {
            error!(error = %e, "Relock after emergency failed, staying in emergency mode");
            return Err(e.into());
        }

        inner.state = LockState::Locked;
        inner.generation += 1;
        inner.emergency_since = None;
        inner.emergency_timeout_exceeded = false;
        inner.cancel_watchdog();
        info!("Emergency mode reset");
        Ok(())
    }

    pub fn state(&self) -> LockState {
        guard(&self.inner).state
    }

    /// Snapshot taken under the controller mutex
    pub fn status(&self) -> DoorStatus {
        let mut inner = guard(&self.inner);
        let sensor = match inner.sensor.read() {
            Ok(level) => Some(level),
            Err(e) => {
                error!(error = %e, "Door sensor read failed");
                None
            }
        };
        DoorStatus {
            state: inner.state,
            locked: inner.state == LockState::Locked,
            emergency: inner.state == LockState::Emergency,
            last_unlock_time: inner.last_unlock_time,
            unlock_count: inner.unlock_count,
            sensor,
            emergency_since: inner.emergency_since,
            emergency_timeout_exceeded: inner.emergency_timeout_exceeded,
            relock_pending: inner.relock.as_ref().is_some_and(|t| !t.is_finished()),
        }
    }

    /// Write the current status as JSON to `path`
    pub fn save_status_log(&self, path: &Path) -> Result<DoorStatus, LockError> {
        let status = self.status();
        let write = || -> Result<(), String> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
            let json = serde_json::to_string_pretty(&status).map_err(|e| e.to_string())?;
            std::fs::write(path, json).map_err(|e| e.to_string())
        };
        match write() {
            Ok(()) => {
                info!(path = %path.display(), "Status log saved");
                Ok(status)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Status log save failed");
                Err(LockError::StatusLog(e))
            }
        }
    }

    /// Cancel timers, release the interrupt and lock a door left unlocked.
    ///
    /// Emergency mode is left as is.
    pub fn shutdown(&self) {
        let subscription = match self.interrupt.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(subscription);

        let mut inner = guard(&self.inner);
        inner.cancel_relock();
        inner.cancel_watchdog();
        if inner.state == LockState::Unlocked {
            match inner.lock_pin.write(LOCKED_LEVEL) {
                Ok(()) => inner.state = LockState::Locked,
                Err(e) => error!(error = %e, "Lock on shutdown failed"),
            }
        }
        info!(state = ?inner.state, "Door lock controller shut down");
    }
}

async fn relock_after(inner: Arc<Mutex<Inner>>, generation: u64, hold: Duration) {
    tokio::time::sleep(hold).await;
    loop {
        {
            let mut inner = guard(&inner);
            if inner.generation != generation || inner.state != LockState::Unlocked {
                return;
            }
            match inner.lock_pin.write(LOCKED_LEVEL) {
                Ok(()) => {
                    inner.state = LockState::Locked;
                    inner.relock = None;
                    info!("Door auto-relocked");
                    return;
                }
                Err(e) => error!(error = %e, "Auto-relock failed, retrying"),
            }
        }
        tokio::time::sleep(RELOCK_RETRY).await;
    }
}

async fn emergency_watchdog(inner: Arc<Mutex<Inner>>, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let mut inner = guard(&inner);
    if inner.state == LockState::Emergency {
        inner.emergency_timeout_exceeded = true;
        warn!(
            timeout_secs = timeout.as_secs(),
            since = ?inner.emergency_since,
            "Emergency mode exceeded timeout, manual reset required"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::Pull;
    use crate::sim::{SimButton, SimInput, SimOutput};

    struct Rig {
        controller: Arc<DoorLockController>,
        actuator: SimOutput,
        sensor: SimInput,
        button: SimButton,
    }

    fn rig() -> Rig {
        let actuator = SimOutput::new(18);
        let sensor = SimInput::new(23, Level::High);
        let button = SimButton::new(Pull::Up);
        let controller = DoorLockController::new(
            DoorConfig::default(),
            Box::new(actuator.clone()),
            Box::new(sensor.clone()),
        )
        .unwrap();
        controller.attach_emergency(&mut button.clone()).unwrap();
        Rig {
            controller,
            actuator,
            sensor,
            button,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlock_then_auto_relock() {
        let rig = rig();
        assert_eq!(rig.actuator.level(), Some(Level::High));

        rig.controller.unlock(Duration::from_secs(5)).unwrap();
        let status = rig.controller.status();
        assert_eq!(status.state, LockState::Unlocked);
        assert_eq!(status.unlock_count, 1);
        assert!(status.relock_pending);
        assert_eq!(rig.actuator.level(), Some(Level::Low));

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert_eq!(rig.controller.state(), LockState::Unlocked);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rig.controller.state(), LockState::Locked);
        assert_eq!(rig.actuator.level(), Some(Level::High));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_is_capped_at_max() {
        let rig = rig();
        rig.controller.unlock(Duration::from_secs(60)).unwrap();
        tokio::time::sleep(Duration::from_millis(10_100)).await;
        assert_eq!(rig.controller.state(), LockState::Locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_transitions() {
        let rig = rig();
        assert!(matches!(
            rig.controller.lock(),
            Err(LockError::InvalidTransition { from: LockState::Locked })
        ));
        rig.controller.unlock(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            rig.controller.unlock(Duration::from_secs(5)),
            Err(LockError::InvalidTransition { from: LockState::Unlocked })
        ));
        assert_eq!(rig.controller.status().unlock_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_lock_cancels_relock() {
        let rig = rig();
        rig.controller.unlock(Duration::from_secs(5)).unwrap();
        rig.controller.lock().unwrap();
        rig.controller.unlock(Duration::from_secs(5)).unwrap();

        // First relock would have fired at 5s; the second unlock is still held
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(rig.controller.state(), LockState::Unlocked);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(rig.controller.state(), LockState::Locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_preempts_relock_and_blocks_transitions() {
        let rig = rig();
        rig.controller.unlock(Duration::from_secs(5)).unwrap();
        rig.button.press();

        let status = rig.controller.status();
        assert!(status.emergency);
        assert!(status.emergency_since.is_some());
        assert_eq!(rig.actuator.level(), Some(Level::Low));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(rig.controller.state(), LockState::Emergency);

        assert!(matches!(rig.controller.lock(), Err(LockError::EmergencyActive)));
        assert!(matches!(
            rig.controller.unlock(Duration::from_secs(5)),
            Err(LockError::EmergencyActive)
        ));
        assert_eq!(rig.actuator.level(), Some(Level::Low));

        rig.controller.reset_emergency_mode().unwrap();
        assert_eq!(rig.controller.state(), LockState::Locked);
        assert_eq!(rig.actuator.level(), Some(Level::High));
        rig.controller.unlock(Duration::from_secs(5)).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_from_locked_survives_actuator_failure() {
        let rig = rig();
        rig.actuator.set_fail(true);
        rig.controller.emergency_override();
        assert_eq!(rig.controller.state(), LockState::Emergency);

        // Reset cannot relock a failing actuator
        assert!(matches!(
            rig.controller.reset_emergency_mode(),
            Err(LockError::Hardware(_))
        ));
        assert_eq!(rig.controller.state(), LockState::Emergency);

        rig.actuator.set_fail(false);
        rig.controller.reset_emergency_mode().unwrap();
        assert_eq!(rig.controller.state(), LockState::Locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlock_hardware_failure_keeps_locked() {
        let rig = rig();
        rig.actuator.set_fail(true);
        assert!(matches!(
            rig.controller.unlock(Duration::from_secs(5)),
            Err(LockError::Hardware(_))
        ));
        let status = rig.controller.status();
        assert_eq!(status.state, LockState::Locked);
        assert_eq!(status.unlock_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relock_retries_until_actuator_recovers() {
        let rig = rig();
        rig.controller.unlock(Duration::from_secs(5)).unwrap();
        rig.actuator.set_fail(true);
        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(rig.controller.state(), LockState::Unlocked);

        rig.actuator.set_fail(false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rig.controller.state(), LockState::Locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_watchdog_flags_timeout() {
        let rig = rig();
        rig.controller.emergency_override();
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(!rig.controller.status().emergency_timeout_exceeded);
        tokio::time::sleep(Duration::from_secs(2)).await;
        let status = rig.controller.status();
        assert!(status.emergency_timeout_exceeded);
        assert!(status.emergency);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_sensor_and_failures() {
        let rig = rig();
        assert_eq!(rig.controller.status().sensor, Some(Level::High));
        rig.sensor.set_fail(true);
        assert_eq!(rig.controller.status().sensor, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_status_log() {
        let rig = rig();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("door_status.json");
        rig.controller.unlock(Duration::from_secs(5)).unwrap();
        rig.controller.save_status_log(&path).unwrap();

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["state"], "unlocked");
        assert_eq!(json["unlock_count"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_locks_and_releases_interrupt() {
        let rig = rig();
        assert_eq!(rig.button.subscribers(), 1);
        rig.controller.unlock(Duration::from_secs(5)).unwrap();
        rig.controller.shutdown();
        assert_eq!(rig.controller.state(), LockState::Locked);
        assert_eq!(rig.button.subscribers(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_emergency_wins_race_against_unlock_and_lock() {
        let rig = rig();
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let interrupt = {
            let controller = Arc::clone(&rig.controller);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                for _ in 0..200 {
                    std::hint::spin_loop();
                }
                controller.emergency_override();
            })
        };

        barrier.wait();
        let mut cycles = 0u32;
        while rig.controller.state() != LockState::Emergency {
            let _ = rig.controller.unlock(Duration::from_millis(50));
            let _ = rig.controller.lock();
            cycles += 1;
        }
        interrupt.join().unwrap();

        // Late requests from the recognition path must bounce off
        for _ in 0..50 {
            assert!(matches!(
                rig.controller.unlock(Duration::from_millis(50)),
                Err(LockError::EmergencyActive)
            ));
            assert!(matches!(rig.controller.lock(), Err(LockError::EmergencyActive)));
        }

        // Any relock scheduled before the override must not fire
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(rig.controller.state(), LockState::Emergency, "after {cycles} cycles");
        assert_eq!(rig.actuator.level(), Some(Level::Low));
    }

    #[test]
    fn test_new_requires_runtime() {
        let result = DoorLockController::new(
            DoorConfig::default(),
            Box::new(SimOutput::new(18)),
            Box::new(SimInput::new(23, Level::High)),
        );
        assert!(matches!(result, Err(LockError::Hardware(HardwareError::Setup(_)))));
    }
}
