//! Recognition Pipeline
//!
//! Turns a camera stream into liveness-gated identity decisions:
//!
//! ```text
//! FrameSource -> FrameDispatcher (thread) -> bounded queue -> Worker pool
//!             -> DecisionAggregator -> { AttendanceStore, DoorLockController }
//! ```
//!
//! `RecognitionService` wires one authentication session at a time and
//! consults the security lockout before starting it.

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod overlay;
pub mod service;
pub mod session;
pub mod worker;

pub use aggregator::{AggregatorStats, Decision, DecisionAggregator};
pub use config::{PipelineConfig, WindowMode};
pub use dispatcher::{DispatchStats, FrameDispatcher};
pub use overlay::PreviewWriter;
pub use service::RecognitionService;
pub use session::{AuthenticationSession, SessionHandle, SessionOutcome, SessionReport};
pub use worker::{Worker, WorkerContext, WorkerReport};

use std::sync::Arc;
use std::time::Duration;

use camera_capture::VideoFrame;
use face_match::{FaceBox, Identity};
use thiserror::Error;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid pipeline configuration: {0}")]
    Config(String),

    #[error("Frame dispatcher failed: {0}")]
    Dispatcher(String),

    #[error("Worker {worker} failed: {message}")]
    Worker { worker: usize, message: String },

    #[error("Session task failed: {0}")]
    Supervisor(String),
}

/// Session start/finish errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Security lockout active, {}s remaining", .remaining.as_secs())]
    LockedOut { remaining: Duration },

    #[error("Unknown class code: {0}")]
    UnknownClass(String),

    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// One frame handed from the dispatcher to the worker pool
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub frame: Arc<VideoFrame>,
    /// Ordered liveness window ending at `frame` (global window mode only)
    pub window: Option<Vec<Arc<VideoFrame>>>,
}

/// Decision for one detected face in one processed frame
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub identity: Identity,
    /// Match confidence in [0, 100]
    pub confidence: f32,
    pub live: bool,
    pub face_box: FaceBox,
    pub sequence: u64,
    pub worker: usize,
    /// Frame the face was found in (processing resolution)
    pub frame: Arc<VideoFrame>,
}
