//! Recognition service
//!
//! Starts authentication sessions behind the security lockout and wires the
//! dispatcher, worker pool and aggregator for each one.

use std::sync::Arc;

use camera_capture::FrameSource;
use chrono::Utc;
use door_lock::DoorLockController;
use face_match::{EnrollmentRegistry, MatcherConfig};
use liveness::LivenessConfig;
use metrics::counter;
use security::LockoutController;
use storage::{AttendanceStore, RecordField};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::aggregator::{AggregatorStats, DecisionAggregator};
use crate::config::{PipelineConfig, WindowMode};
use crate::dispatcher::{DispatchStats, FrameDispatcher};
use crate::overlay::PreviewWriter;
use crate::session::{AuthenticationSession, SessionHandle, SessionOutcome, SessionReport};
use crate::worker::{Worker, WorkerContext, WorkerReport};
use crate::{PipelineError, SessionError};

/// Results buffered between the pool and the aggregator
const RESULT_CAPACITY: usize = 64;

/// Recognition service
pub struct RecognitionService {
    config: PipelineConfig,
    liveness: LivenessConfig,
    matcher: MatcherConfig,
    downsample: u32,
    frame_rate: u32,
    registry: Arc<EnrollmentRegistry>,
    store: Arc<dyn AttendanceStore>,
    lockout: Arc<LockoutController>,
    door: Option<Arc<DoorLockController>>,
}

impl RecognitionService {
    pub fn new(
        config: PipelineConfig,
        registry: Arc<EnrollmentRegistry>,
        store: Arc<dyn AttendanceStore>,
        lockout: Arc<LockoutController>,
    ) -> Self {
        info!(
            "Creating recognition service: workers={}, queue={}, window={:?}",
            config.workers, config.queue_capacity, config.window_mode
        );
        Self {
            config,
            liveness: LivenessConfig::default(),
            matcher: MatcherConfig::default(),
            downsample: 1,
            frame_rate: 0,
            registry,
            store,
            lockout,
            door: None,
        }
    }

    pub fn with_liveness(mut self, liveness: LivenessConfig) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn with_matcher(mut self, matcher: MatcherConfig) -> Self {
        self.matcher = matcher;
        self
    }

    /// Downsampling factor applied to frames before analysis
    pub fn with_downsample(mut self, factor: u32) -> Self {
        self.downsample = factor.max(1);
        self
    }

    /// Target acquisition rate in frames per second; 0 reads unpaced
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps;
        self
    }

    /// Grant the door on live matches
    pub fn with_door(mut self, door: Arc<DoorLockController>) -> Self {
        self.door = Some(door);
        self
    }

    pub fn registry(&self) -> &Arc<EnrollmentRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn AttendanceStore> {
        &self.store
    }

    pub fn lockout(&self) -> &Arc<LockoutController> {
        &self.lockout
    }

    pub fn door(&self) -> Option<&Arc<DoorLockController>> {
        self.door.as_ref()
    }

    /// Start a session for `class_code` reading from `source`.
    ///
    /// Refused while the security lockout is active. The session runs until
    /// the source ends or the handle is stopped; if it records nobody, or a
    /// stage fails, it counts as an authentication failure.
    pub async fn start_session(
        &self,
        class_code: &str,
        source: Box<dyn FrameSource>,
    ) -> Result<SessionHandle, SessionError> {
        if !self.lockout.check_allowed() {
            let remaining = self.lockout.remaining().unwrap_or_default();
            warn!(class_code, remaining_secs = remaining.as_secs(), "Session refused, security lockout active");
            return Err(SessionError::LockedOut { remaining });
        }

        self.config.validate()?;
        self.liveness
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        if self.config.require_known_class {
            let known = self.store.list_distinct(RecordField::ClassCode).await?;
            if !known.iter().any(|code| code == class_code) {
                warn!(class_code, "Session refused, class code not found");
                return Err(SessionError::UnknownClass(class_code.to_string()));
            }
        }

        let session = AuthenticationSession::new(class_code);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity);
        let (results_tx, results_rx) = mpsc::channel(RESULT_CAPACITY);

        let global_window = match self.config.window_mode {
            WindowMode::Global => Some(self.liveness.blink_window),
            WindowMode::PerWorker => None,
        };
        let dispatched = FrameDispatcher::new(
            source,
            queue_tx,
            cancel_rx.clone(),
            self.downsample,
            global_window,
            self.config.read_retry(),
        )
        .with_frame_rate(self.frame_rate)
        .spawn()?;

        let ctx = Arc::new(WorkerContext {
            analyzer: self.registry.analyzer(),
            registry: Arc::clone(&self.registry),
            distance_threshold: self.matcher.distance_threshold,
        });
        let queue = Arc::new(Mutex::new(queue_rx));
        let workers: Vec<JoinHandle<Result<WorkerReport, PipelineError>>> = (0..self.config.workers)
            .map(|id| {
                let worker = Worker::new(id, &self.liveness, self.config.window_mode, Arc::clone(&ctx));
                tokio::spawn(worker.run(Arc::clone(&queue), results_tx.clone(), cancel_rx.clone()))
            })
            .collect();
        drop(queue);
        drop(results_tx);

        let mut aggregator = DecisionAggregator::new(session.clone(), Arc::clone(&self.store));
        if let Some(door) = &self.door {
            if door.config().enabled {
                aggregator = aggregator.with_door(Arc::clone(door), door.config().unlock_duration());
            }
        }
        if let Some(path) = &self.config.preview_path {
            aggregator = aggregator.with_preview(PreviewWriter::new(path));
        }
        let aggregated = tokio::spawn(aggregator.run(results_rx));

        info!(
            session = %session.id(),
            class_code,
            workers = self.config.workers,
            "Authentication session started"
        );

        let supervisor = tokio::spawn(supervise(
            session.clone(),
            dispatched,
            workers,
            aggregated,
            Arc::clone(&self.lockout),
        ));
        Ok(SessionHandle::new(&session, cancel_tx, supervisor))
    }
}

/// Wait for every stage, then decide the outcome and update the lockout
async fn supervise(
    session: AuthenticationSession,
    dispatched: tokio::sync::oneshot::Receiver<DispatchStats>,
    workers: Vec<JoinHandle<Result<WorkerReport, PipelineError>>>,
    aggregated: JoinHandle<(AuthenticationSession, AggregatorStats)>,
    lockout: Arc<LockoutController>,
) -> SessionReport {
    let mut failure: Option<String> = None;

    let dispatch = match dispatched.await {
        Ok(stats) => {
            if let Some(reason) = &stats.failure {
                failure = Some(reason.clone());
            }
            stats
        }
        Err(_) => {
            failure = Some("frame dispatcher exited without reporting".into());
            DispatchStats::default()
        }
    };

    let mut worker_reports = Vec::with_capacity(workers.len());
    for handle in workers {
        match handle.await {
            Ok(Ok(report)) => worker_reports.push(report),
            Ok(Err(e)) => {
                error!(error = %e, "Worker failed");
                failure.get_or_insert_with(|| e.to_string());
            }
            Err(e) => {
                error!(error = %e, "Worker task failed");
                failure.get_or_insert_with(|| e.to_string());
            }
        }
    }

    let (finished, stats) = match aggregated.await {
        Ok(done) => done,
        Err(e) => {
            error!(error = %e, "Aggregator task failed");
            failure.get_or_insert_with(|| e.to_string());
            (session, AggregatorStats::default())
        }
    };

    let recorded: Vec<String> = finished.recorded().map(str::to_string).collect();
    let outcome = match failure {
        Some(reason) => SessionOutcome::Aborted { reason },
        None if recorded.is_empty() => SessionOutcome::NoIdentity,
        None => SessionOutcome::Authenticated,
    };

    let lockout_engaged = if outcome.is_failure() {
        counter!("faceguard_auth_failures_total").increment(1);
        lockout.record_failure().lockout_engaged
    } else {
        false
    };

    info!(
        session = %finished.id(),
        class_code = %finished.class_code(),
        recorded = recorded.len(),
        frames = dispatch.dispatched,
        outcome = ?outcome,
        "Authentication session finished"
    );

    SessionReport {
        session_id: finished.id(),
        class_code: finished.class_code().to_string(),
        started_at: finished.started_at(),
        finished_at: Utc::now(),
        recorded,
        frames_dispatched: dispatch.dispatched,
        read_failures: dispatch.read_failures,
        results: stats.results,
        live_results: stats.live_results,
        workers: worker_reports,
        outcome,
        lockout_engaged,
    }
}
