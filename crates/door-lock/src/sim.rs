//! Simulated GPIO pins
//!
//! Each pin hands out a cloneable handle so tests can inspect writes, set
//! input levels, press the emergency button and inject I/O failures.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::hardware::{DigitalInput, DigitalOutput, Edge, EdgeHandler, InterruptSource, Level, Pull, Subscription};
use crate::HardwareError;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Default)]
struct OutputState {
    writes: Mutex<Vec<Level>>,
    fail: AtomicBool,
}

/// Simulated output pin
#[derive(Debug, Clone)]
pub struct SimOutput {
    pin: u32,
    state: Arc<OutputState>,
}

impl SimOutput {
    pub fn new(pin: u32) -> Self {
        Self {
            pin,
            state: Arc::new(OutputState::default()),
        }
    }

    /// Every level written so far
    pub fn writes(&self) -> Vec<Level> {
        lock(&self.state.writes).clone()
    }

    /// Most recent level written
    pub fn level(&self) -> Option<Level> {
        lock(&self.state.writes).last().copied()
    }

    /// Make subsequent writes fail until cleared
    pub fn set_fail(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }
}

impl DigitalOutput for SimOutput {
    fn write(&mut self, level: Level) -> Result<(), HardwareError> {
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(HardwareError::Io {
                pin: self.pin,
                message: "simulated write failure".into(),
            });
        }
        debug!(pin = self.pin, ?level, "sim write");
        lock(&self.state.writes).push(level);
        Ok(())
    }
}

/// Simulated input pin
#[derive(Debug, Clone)]
pub struct SimInput {
    pin: u32,
    level: Arc<Mutex<Level>>,
    fail: Arc<AtomicBool>,
}

impl SimInput {
    pub fn new(pin: u32, level: Level) -> Self {
        Self {
            pin,
            level: Arc::new(Mutex::new(level)),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_level(&self, level: Level) {
        *lock(&self.level) = level;
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl DigitalInput for SimInput {
    fn read(&mut self) -> Result<Level, HardwareError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HardwareError::Io {
                pin: self.pin,
                message: "simulated read failure".into(),
            });
        }
        Ok(*lock(&self.level))
    }
}

struct Registration {
    id: u64,
    edge: Edge,
    debounce: Duration,
    last_fired: Option<Instant>,
    handler: Arc<EdgeHandler>,
}

#[derive(Default)]
struct ButtonState {
    level: Mutex<Option<Level>>,
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

/// Simulated push button with interrupt delivery.
///
/// Handlers run synchronously on the thread that changes the level, the way
/// a GPIO library invokes callbacks from its event thread.
#[derive(Clone)]
pub struct SimButton {
    pull: Pull,
    state: Arc<ButtonState>,
}

impl SimButton {
    pub fn new(pull: Pull) -> Self {
        let state = ButtonState::default();
        *lock(&state.level) = Some(pull.idle_level());
        Self {
            pull,
            state: Arc::new(state),
        }
    }

    /// Drive the pin to `level`, firing matching handlers
    pub fn set_level(&self, level: Level) {
        let previous = lock(&self.state.level).replace(level).unwrap_or(level);
        let now = Instant::now();

        let to_fire: Vec<Arc<EdgeHandler>> = {
            let mut registrations = lock(&self.state.registrations);
            registrations
                .iter_mut()
                .filter(|r| r.edge.matches(previous, level))
                .filter_map(|r| {
                    let bounced = r.last_fired.is_some_and(|at| now.duration_since(at) < r.debounce);
                    if bounced {
                        return None;
                    }
                    r.last_fired = Some(now);
                    Some(Arc::clone(&r.handler))
                })
                .collect()
        };

        for handler in to_fire {
            handler();
        }
    }

    /// Press and release: drives the active level then back to idle
    pub fn press(&self) {
        let idle = self.pull.idle_level();
        let active = if idle.is_high() { Level::Low } else { Level::High };
        self.set_level(active);
        self.set_level(idle);
    }

    /// Number of live handler registrations
    pub fn subscribers(&self) -> usize {
        lock(&self.state.registrations).len()
    }
}

impl InterruptSource for SimButton {
    fn on_edge(&mut self, edge: Edge, debounce: Duration, handler: EdgeHandler) -> Result<Subscription, HardwareError> {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.registrations).push(Registration {
            id,
            edge,
            debounce,
            last_fired: None,
            handler: Arc::new(handler),
        });

        let state = Arc::clone(&self.state);
        Ok(Subscription::new(move || {
            lock(&state.registrations).retain(|r| r.id != id);
        }))
    }
}
