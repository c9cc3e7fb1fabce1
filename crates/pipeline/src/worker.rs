//! Matcher/Liveness Worker
//!
//! Workers share one receiver behind an async mutex and race for frames.
//! Face analysis is CPU-bound and runs on the blocking pool; the worker's
//! liveness state is moved into the blocking task and handed back.

use std::sync::Arc;

use camera_capture::VideoFrame;
use face_match::{EnrollmentRegistry, FaceAnalyzer, FaceLandmarks, MatchError};
use liveness::{LivenessConfig, LivenessStats, LivenessTracker};
use metrics::counter;
use ring_buffer::RingBuffer;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::WindowMode;
use crate::{MatchResult, PipelineError, WorkItem};

/// Work queue receiver shared by the pool
pub type SharedQueue = Arc<Mutex<mpsc::Receiver<WorkItem>>>;

/// Read-only inputs shared by every worker
pub struct WorkerContext {
    pub analyzer: Arc<dyn FaceAnalyzer>,
    pub registry: Arc<EnrollmentRegistry>,
    pub distance_threshold: f32,
}

/// Per-worker counters, returned when the worker stops
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerReport {
    pub worker: usize,
    pub frames: u64,
    pub results: u64,
    pub live_results: u64,
    pub analysis_errors: u64,
    pub liveness: LivenessStats,
}

struct WorkerState {
    tracker: LivenessTracker,
    window: RingBuffer<Arc<VideoFrame>>,
    window_size: usize,
}

impl WorkerState {
    fn process(&mut self, ctx: &WorkerContext, worker: usize, item: WorkItem) -> Result<Vec<MatchResult>, MatchError> {
        let frame = item.frame;
        let motion = self.tracker.observe_frame(&frame);

        let window = match item.window {
            Some(window) => window,
            None => {
                self.window.push(Arc::clone(&frame));
                self.window.snapshot()
            }
        };
        if window.len() < self.window_size {
            debug!(worker, sequence = frame.sequence, filled = window.len(), "Liveness window filling");
            return Ok(Vec::new());
        }

        let faces = ctx.analyzer.locate(&frame)?;
        if faces.is_empty() {
            // timed_out() logs; restarting the clock keeps it to once per period
            if self.tracker.timed_out() {
                self.tracker.reset();
            }
            return Ok(Vec::new());
        }
        self.tracker.note_detection();

        let embeddings = ctx.analyzer.embed(&frame, &faces)?;
        let enrolled = ctx.registry.snapshot();
        let threshold = self.tracker.distance_threshold().unwrap_or(ctx.distance_threshold);

        let mut results = Vec::with_capacity(faces.len());
        for (face_box, embedding) in faces.into_iter().zip(embeddings) {
            let outcome = enrolled.best_match(&embedding, threshold);
            let live = if outcome.identity.is_known() {
                let landmarks: Vec<Option<FaceLandmarks>> = window
                    .iter()
                    .map(|wf| {
                        ctx.analyzer.landmarks(wf, &face_box).unwrap_or_else(|e| {
                            debug!(worker, sequence = wf.sequence, error = %e, "Landmark extraction failed");
                            None
                        })
                    })
                    .collect();
                self.tracker
                    .assess(&landmarks, Some(&face_box), true, motion.recent_motion)
                    .live
            } else {
                false
            };

            results.push(MatchResult {
                identity: outcome.identity,
                confidence: outcome.confidence,
                live,
                face_box,
                sequence: frame.sequence,
                worker,
                frame: Arc::clone(&frame),
            });
        }
        Ok(results)
    }
}

/// One member of the worker pool
pub struct Worker {
    id: usize,
    ctx: Arc<WorkerContext>,
    state: WorkerState,
}

impl Worker {
    pub fn new(id: usize, config: &LivenessConfig, mode: WindowMode, ctx: Arc<WorkerContext>) -> Self {
        // In global mode the window arrives with each frame
        let own_window = match mode {
            WindowMode::Global => 1,
            WindowMode::PerWorker => config.blink_window,
        };
        Self {
            id,
            ctx,
            state: WorkerState {
                tracker: LivenessTracker::new(config),
                window: RingBuffer::new(own_window),
                window_size: config.blink_window,
            },
        }
    }

    /// Consume frames until the queue closes or the session is cancelled.
    ///
    /// Frames still queued at cancellation are abandoned.
    pub async fn run(
        self,
        queue: SharedQueue,
        results: mpsc::Sender<MatchResult>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<WorkerReport, PipelineError> {
        let Worker { id, ctx, mut state } = self;
        info!(worker = id, "Starting worker");

        let mut report = WorkerReport {
            worker: id,
            frames: 0,
            results: 0,
            live_results: 0,
            analysis_errors: 0,
            liveness: state.tracker.statistics(),
        };

        loop {
            if *cancel.borrow() {
                break;
            }

            let item = {
                let mut rx = tokio::select! {
                    biased;
                    _ = cancel.changed() => break,
                    rx = queue.lock() => rx,
                };
                tokio::select! {
                    biased;
                    _ = cancel.changed() => break,
                    item = rx.recv() => item,
                }
            };
            let Some(item) = item else {
                debug!(worker = id, "Work queue drained");
                break;
            };
            report.frames += 1;

            let task_ctx = Arc::clone(&ctx);
            let (returned, outcome) = tokio::task::spawn_blocking(move || {
                let outcome = state.process(&task_ctx, id, item);
                (state, outcome)
            })
            .await
            .map_err(|e| PipelineError::Worker {
                worker: id,
                message: e.to_string(),
            })?;
            state = returned;

            let matches = match outcome {
                Ok(matches) => matches,
                Err(e) => {
                    report.analysis_errors += 1;
                    warn!(worker = id, error = %e, "Frame analysis failed, skipping frame");
                    continue;
                }
            };

            for result in matches {
                let identity = if result.identity.is_known() { "known" } else { "unknown" };
                let live = if result.live { "true" } else { "false" };
                counter!("faceguard_match_results_total", "identity" => identity, "live" => live).increment(1);
                report.results += 1;
                if result.live {
                    report.live_results += 1;
                }
                debug!(
                    worker = id,
                    sequence = result.sequence,
                    identity = %result.identity,
                    confidence = result.confidence,
                    live = result.live,
                    "Match result"
                );
                if results.send(result).await.is_err() {
                    debug!(worker = id, "Result channel closed");
                    report.liveness = state.tracker.statistics();
                    return Ok(report);
                }
            }
        }

        report.liveness = state.tracker.statistics();
        info!(worker = id, frames = report.frames, results = report.results, "Worker stopped");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use face_match::{EnrolledSet, Embedding, FaceBox, Identity, ScriptedAnalyzer, ScriptedFace};
    use liveness::testing::frontal_landmarks;

    const FACE: FaceBox = FaceBox::new(60, 200, 180, 60);

    fn face(embedding: Vec<f32>, ear: f32) -> ScriptedFace {
        ScriptedFace {
            face_box: FACE,
            embedding: Embedding::new(embedding),
            landmarks: Some(frontal_landmarks(ear)),
        }
    }

    fn context(analyzer: ScriptedAnalyzer) -> Arc<WorkerContext> {
        let mut enrolled = EnrolledSet::new();
        enrolled.add("u1", Embedding::new(vec![0.0, 0.0, 0.0]));
        let analyzer: Arc<dyn FaceAnalyzer> = Arc::new(analyzer);
        Arc::new(WorkerContext {
            registry: Arc::new(EnrollmentRegistry::fixed(enrolled, Arc::clone(&analyzer))),
            analyzer,
            distance_threshold: 0.6,
        })
    }

    fn blink_script(embedding: Vec<f32>) -> ScriptedAnalyzer {
        [0.3, 0.1, 0.1, 0.1, 0.3]
            .into_iter()
            .enumerate()
            .fold(ScriptedAnalyzer::new(), |script, (i, ear)| {
                script.with_frame(i as u64 + 1, vec![face(embedding.clone(), ear)])
            })
    }

    fn item(sequence: u64, window: Option<Vec<Arc<VideoFrame>>>) -> WorkItem {
        WorkItem {
            frame: Arc::new(VideoFrame::solid(320, 240, [90, 90, 90]).restamped(0, sequence)),
            window,
        }
    }

    fn global_items(n: u64) -> Vec<WorkItem> {
        let mut window: Vec<Arc<VideoFrame>> = Vec::new();
        (1..=n)
            .map(|seq| {
                let frame = Arc::new(VideoFrame::solid(320, 240, [90, 90, 90]).restamped(0, seq));
                window.push(Arc::clone(&frame));
                if window.len() > 5 {
                    window.remove(0);
                }
                WorkItem {
                    frame,
                    window: Some(window.clone()),
                }
            })
            .collect()
    }

    fn worker(mode: WindowMode, analyzer: ScriptedAnalyzer) -> Worker {
        Worker::new(0, &LivenessConfig::default(), mode, context(analyzer))
    }

    #[test]
    fn test_defers_until_window_full() {
        let mut w = worker(WindowMode::PerWorker, blink_script(vec![0.0, 0.0, 0.0]));
        for seq in 1..=4 {
            let results = w.state.process(&w.ctx, 0, item(seq, None)).unwrap();
            assert!(results.is_empty(), "frame {seq} should defer");
        }
        let results = w.state.process(&w.ctx, 0, item(5, None)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].identity, Identity::Known("u1".into()));
        assert!(results[0].live);
    }

    #[test]
    fn test_global_window_blink_is_live() {
        let mut w = worker(WindowMode::Global, blink_script(vec![0.1, 0.0, 0.0]));
        let mut last = Vec::new();
        for item in global_items(5) {
            last = w.state.process(&w.ctx, 0, item).unwrap();
        }
        assert_eq!(last.len(), 1);
        assert!(last[0].live);
        assert!(last[0].confidence > 80.0);
    }

    #[test]
    fn test_tightened_distance_threshold_rejects_match() {
        let mut w = worker(WindowMode::Global, blink_script(vec![0.3, 0.0, 0.0]));
        w.state.tracker.update_thresholds(liveness::ThresholdUpdate {
            face_distance_threshold: Some(0.2),
            ..Default::default()
        });
        let mut last = Vec::new();
        for item in global_items(5) {
            last = w.state.process(&w.ctx, 0, item).unwrap();
        }
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].identity, Identity::Unknown);
        assert!(!last[0].live);
    }

    #[test]
    fn test_unknown_face_never_live() {
        let mut w = worker(WindowMode::Global, blink_script(vec![5.0, 5.0, 5.0]));
        let mut last = Vec::new();
        for item in global_items(5) {
            last = w.state.process(&w.ctx, 0, item).unwrap();
        }
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].identity, Identity::Unknown);
        assert!(!last[0].live);
        assert_eq!(last[0].confidence, 0.0);
    }

    #[test]
    fn test_static_closed_eyes_not_live() {
        let analyzer = ScriptedAnalyzer::new().with_default(vec![face(vec![0.0, 0.0, 0.0], 0.1)]);
        let mut w = worker(WindowMode::Global, analyzer);
        let mut last = Vec::new();
        for item in global_items(5) {
            last = w.state.process(&w.ctx, 0, item).unwrap();
        }
        assert_eq!(last.len(), 1);
        assert!(last[0].identity.is_known());
        assert!(!last[0].live);
    }

    #[test]
    fn test_analysis_error_surfaces() {
        let mut w = worker(WindowMode::Global, blink_script(vec![0.0; 3]).failing_on(5));
        let items = global_items(5);
        let mut outcome = Ok(Vec::new());
        for item in items {
            outcome = w.state.process(&w.ctx, 0, item);
        }
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_reports() {
        let (tx, rx) = mpsc::channel(10);
        let (results_tx, mut results_rx) = mpsc::channel(10);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        for item in global_items(5) {
            tx.send(item).await.unwrap();
        }
        drop(tx);

        let w = worker(WindowMode::Global, blink_script(vec![0.0; 3]));
        let report = w
            .run(Arc::new(Mutex::new(rx)), results_tx, cancel_rx)
            .await
            .unwrap();
        assert_eq!(report.frames, 5);
        assert_eq!(report.results, 1);
        assert_eq!(report.live_results, 1);

        let result = results_rx.recv().await.unwrap();
        assert_eq!(result.sequence, 5);
        assert!(results_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (_tx, rx) = mpsc::channel::<WorkItem>(10);
        let (results_tx, _results_rx) = mpsc::channel(10);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let w = worker(WindowMode::Global, ScriptedAnalyzer::new());
        let handle = tokio::spawn(w.run(Arc::new(Mutex::new(rx)), results_tx, cancel_rx));
        cancel_tx.send_replace(true);

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.frames, 0);
    }
}
