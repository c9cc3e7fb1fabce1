//! Pipeline configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Where the liveness window lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// One ordered window kept by the dispatcher, shipped with every frame
    #[default]
    Global,
    /// Each worker windows the frames it personally processed
    PerWorker,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded work queue capacity (backpressure point)
    pub queue_capacity: usize,
    /// Worker pool size
    pub workers: usize,
    pub window_mode: WindowMode,
    /// Pause after a failed frame read before retrying
    pub read_retry_ms: u64,
    /// Only start sessions for class codes already in the attendance store
    pub require_known_class: bool,
    /// Write an annotated preview image here after every decision
    pub preview_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            workers: 3,
            window_mode: WindowMode::Global,
            read_retry_ms: 10,
            require_known_class: false,
            preview_path: None,
        }
    }
}

impl PipelineConfig {
    pub fn read_retry(&self) -> Duration {
        Duration::from_millis(self.read_retry_ms)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config("queue_capacity must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(PipelineError::Config("workers must be at least 1".into()));
        }
        Ok(())
    }
}
