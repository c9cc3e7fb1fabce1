//! Door Lock Control
//!
//! Safety-critical lock state machine (`Locked`, `Unlocked`, `Emergency`)
//! over minimal GPIO capabilities, with simulated and Linux sysfs pins.

pub mod controller;
pub mod hardware;
pub mod sim;
pub mod sysfs;

pub use controller::{DoorLockController, DoorStatus};
pub use hardware::{DigitalInput, DigitalOutput, Edge, InterruptSource, Level, Pull, Subscription};

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Hardware error types
#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("GPIO {pin} I/O error: {message}")]
    Io { pin: u32, message: String },

    #[error("Hardware setup failed: {0}")]
    Setup(String),
}

/// Lock controller error types
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Emergency mode active")]
    EmergencyActive,

    #[error("Invalid transition from {from}")]
    InvalidTransition { from: LockState },

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error("Status log write failed: {0}")]
    StatusLog(String),
}

/// Lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    #[default]
    Locked,
    Unlocked,
    Emergency,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Locked => f.write_str("locked"),
            LockState::Unlocked => f.write_str("unlocked"),
            LockState::Emergency => f.write_str("emergency"),
        }
    }
}

/// Pin driver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareBackend {
    #[default]
    Simulated,
    Sysfs,
}

/// Door configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoorConfig {
    /// Drive the lock on live matches
    pub enabled: bool,
    pub backend: HardwareBackend,
    pub lock_pin: u32,
    pub sensor_pin: u32,
    pub emergency_pin: u32,
    pub unlock_duration_secs: u64,
    pub max_unlock_duration_secs: u64,
    pub emergency_timeout_secs: u64,
    pub debounce_ms: u64,
    pub emergency_pull: Pull,
    pub emergency_edge: Edge,
    pub status_log_path: PathBuf,
}

impl Default for DoorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: HardwareBackend::Simulated,
            lock_pin: 18,
            sensor_pin: 23,
            emergency_pin: 24,
            unlock_duration_secs: 5,
            max_unlock_duration_secs: 10,
            emergency_timeout_secs: 300,
            debounce_ms: 300,
            emergency_pull: Pull::Up,
            emergency_edge: Edge::Falling,
            status_log_path: PathBuf::from("logs/door_status.json"),
        }
    }
}

impl DoorConfig {
    pub fn unlock_duration(&self) -> Duration {
        Duration::from_secs(self.unlock_duration_secs)
    }

    pub fn max_unlock_duration(&self) -> Duration {
        Duration::from_secs(self.max_unlock_duration_secs)
    }

    pub fn emergency_timeout(&self) -> Duration {
        Duration::from_secs(self.emergency_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Simulated pin handles handed back alongside simulated hardware
#[derive(Clone)]
pub struct SimHandles {
    pub actuator: sim::SimOutput,
    pub sensor: sim::SimInput,
    pub button: sim::SimButton,
}

/// Pins for one door
pub struct DoorHardware {
    pub lock_pin: Box<dyn DigitalOutput>,
    pub sensor: Box<dyn DigitalInput>,
    pub emergency: Box<dyn InterruptSource>,
}

impl DoorHardware {
    /// Simulated pins plus handles to drive them
    pub fn simulated(config: &DoorConfig) -> (Self, SimHandles) {
        let handles = SimHandles {
            actuator: sim::SimOutput::new(config.lock_pin),
            sensor: sim::SimInput::new(config.sensor_pin, Level::High),
            button: sim::SimButton::new(config.emergency_pull),
        };
        let hardware = Self {
            lock_pin: Box::new(handles.actuator.clone()),
            sensor: Box::new(handles.sensor.clone()),
            emergency: Box::new(handles.button.clone()),
        };
        (hardware, handles)
    }

    /// Export and configure the sysfs pins; any failure is a setup error
    pub fn sysfs(config: &DoorConfig) -> Result<Self, HardwareError> {
        if config.emergency_pull != Pull::Off {
            info!(
                pin = config.emergency_pin,
                pull = ?config.emergency_pull,
                "emergency input bias must be provided by the board"
            );
        }
        Ok(Self {
            lock_pin: Box::new(sysfs::SysfsPin::export(config.lock_pin)?.into_output(Level::High)?),
            sensor: Box::new(sysfs::SysfsPin::export(config.sensor_pin)?.into_input()?),
            emergency: Box::new(sysfs::SysfsPin::export(config.emergency_pin)?.into_interrupt()?),
        })
    }
}
