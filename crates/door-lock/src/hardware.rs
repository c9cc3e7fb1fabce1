//! Minimal GPIO capabilities used by the lock controller

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::HardwareError;

/// Digital signal level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(&self) -> bool {
        matches!(self, Level::High)
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Interrupt edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

impl Edge {
    /// Value for the sysfs `edge` attribute
    pub fn as_sysfs(&self) -> &'static str {
        match self {
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Both => "both",
        }
    }

    /// Whether a transition `from -> to` fires this edge
    pub fn matches(&self, from: Level, to: Level) -> bool {
        match self {
            Edge::Rising => from == Level::Low && to == Level::High,
            Edge::Falling => from == Level::High && to == Level::Low,
            Edge::Both => from != to,
        }
    }
}

/// Input bias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    Up,
    Down,
    Off,
}

impl Pull {
    /// Idle level of an input with this bias
    pub fn idle_level(&self) -> Level {
        match self {
            Pull::Up => Level::High,
            Pull::Down | Pull::Off => Level::Low,
        }
    }
}

/// Output pin (lock actuator)
pub trait DigitalOutput: Send {
    fn write(&mut self, level: Level) -> Result<(), HardwareError>;
}

/// Input pin (door sensor)
pub trait DigitalInput: Send {
    fn read(&mut self) -> Result<Level, HardwareError>;
}

/// Edge callback; runs on the interrupt delivery thread
pub type EdgeHandler = Box<dyn Fn() + Send + Sync + 'static>;

/// Input pin with interrupt capability (emergency button)
pub trait InterruptSource: Send {
    /// Invoke `handler` on every `edge`, ignoring repeats within `debounce`
    fn on_edge(&mut self, edge: Edge, debounce: Duration, handler: EdgeHandler) -> Result<Subscription, HardwareError>;
}

/// Active interrupt registration; dropping it stops delivery
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
