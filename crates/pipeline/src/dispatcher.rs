//! Frame Dispatcher
//!
//! Owns the frame source on a dedicated thread. Reads block on the camera and
//! submission blocks on the bounded work queue when workers fall behind, so a
//! slow pool slows acquisition instead of dropping frames.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use camera_capture::{CameraError, FrameSource, VideoFrame};
use metrics::counter;
use ring_buffer::RingBuffer;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::{PipelineError, WorkItem};

/// Dispatcher counters, returned when the dispatch loop ends
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub read_failures: u64,
    /// Set when the source failed in a way that cannot be retried
    pub failure: Option<String>,
}

/// Frame dispatcher
pub struct FrameDispatcher {
    source: Box<dyn FrameSource>,
    queue: mpsc::Sender<WorkItem>,
    cancel: watch::Receiver<bool>,
    downsample: u32,
    /// Global liveness window; `None` when workers keep their own
    window: Option<RingBuffer<Arc<VideoFrame>>>,
    read_retry: Duration,
    /// Minimum spacing between reads; `None` reads as fast as the queue drains
    frame_interval: Option<Duration>,
    next_sequence: u64,
    stats: DispatchStats,
}

impl FrameDispatcher {
    pub fn new(
        source: Box<dyn FrameSource>,
        queue: mpsc::Sender<WorkItem>,
        cancel: watch::Receiver<bool>,
        downsample: u32,
        window: Option<usize>,
        read_retry: Duration,
    ) -> Self {
        let (width, height) = source.resolution();
        info!(
            "Creating frame dispatcher: {}x{}, downsample={}, global_window={:?}",
            width, height, downsample, window
        );
        Self {
            source,
            queue,
            cancel,
            downsample,
            window: window.map(RingBuffer::new),
            read_retry,
            frame_interval: None,
            next_sequence: 0,
            stats: DispatchStats::default(),
        }
    }

    /// Pace acquisition to `fps` frames per second; 0 leaves it unpaced
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_interval = (fps > 0).then(|| Duration::from_secs(1) / fps);
        self
    }

    /// Run the dispatch loop on a named thread.
    ///
    /// The returned receiver resolves with the final counters; it errors only
    /// if the thread died without reporting.
    pub fn spawn(self) -> Result<oneshot::Receiver<DispatchStats>, PipelineError> {
        let (done_tx, done_rx) = oneshot::channel();
        thread::Builder::new()
            .name("frame-dispatcher".into())
            .spawn(move || {
                let stats = self.run();
                let _ = done_tx.send(stats);
            })
            .map_err(|e| PipelineError::Dispatcher(e.to_string()))?;
        Ok(done_rx)
    }

    /// Blocking dispatch loop
    ///
    /// Stops on cancellation, end of stream, a non-retryable source error, or
    /// when every worker has gone away.
    pub fn run(mut self) -> DispatchStats {
        info!("Starting frame dispatcher");

        loop {
            if *self.cancel.borrow() {
                info!("Frame dispatcher cancelled");
                break;
            }

            let deadline = self.frame_interval.map(|interval| Instant::now() + interval);
            let frame = match self.source.read() {
                Ok(frame) => frame,
                Err(CameraError::EndOfStream) => {
                    info!("Frame stream ended");
                    break;
                }
                Err(e) if e.is_transient() => {
                    self.stats.read_failures += 1;
                    counter!("faceguard_frames_dropped_read_total").increment(1);
                    warn!(error = %e, "Frame read failed, retrying");
                    thread::sleep(self.read_retry);
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Frame source failed");
                    self.stats.failure = Some(e.to_string());
                    break;
                }
            };

            let item = self.prepare(frame);
            let sequence = item.frame.sequence;
            if self.queue.blocking_send(item).is_err() {
                debug!("Work queue closed");
                break;
            }
            self.stats.dispatched += 1;
            counter!("faceguard_frames_dispatched_total").increment(1);
            debug!(sequence, "Frame dispatched");

            if let Some(deadline) = deadline {
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                }
            }
        }

        info!(
            dispatched = self.stats.dispatched,
            read_failures = self.stats.read_failures,
            "Frame dispatcher stopped"
        );
        self.stats
    }

    fn prepare(&mut self, frame: VideoFrame) -> WorkItem {
        self.next_sequence += 1;
        let timestamp_ns = frame.timestamp_ns;
        let frame = Arc::new(
            frame
                .downsample(self.downsample)
                .restamped(timestamp_ns, self.next_sequence),
        );
        let window = self.window.as_mut().map(|window| {
            window.push(Arc::clone(&frame));
            window.snapshot()
        });
        WorkItem { frame, window }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::{ScriptedRead, ScriptedSource};

    fn frames(n: usize) -> Vec<ScriptedRead> {
        (0..n)
            .map(|_| ScriptedRead::Frame(VideoFrame::solid(8, 8, [10, 10, 10])))
            .collect()
    }

    fn dispatcher(reads: Vec<ScriptedRead>, capacity: usize, window: Option<usize>) -> (FrameDispatcher, mpsc::Receiver<WorkItem>, watch::Sender<bool>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let source = Box::new(ScriptedSource::new(reads));
        (
            FrameDispatcher::new(source, tx, cancel_rx, 2, window, Duration::ZERO),
            rx,
            cancel_tx,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<WorkItem>) -> Vec<WorkItem> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    #[test]
    fn test_dispatch_assigns_sequence_and_downsamples() {
        let (dispatcher, mut rx, _cancel) = dispatcher(frames(3), 10, None);
        let stats = dispatcher.run();
        assert_eq!(stats.dispatched, 3);

        let items = drain(&mut rx);
        let sequences: Vec<u64> = items.iter().map(|i| i.frame.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!((items[0].frame.width, items[0].frame.height), (4, 4));
        assert!(items[0].window.is_none());
    }

    #[test]
    fn test_read_failure_is_retried() {
        let mut reads = frames(1);
        reads.push(ScriptedRead::Failure);
        reads.extend(frames(1));
        let (dispatcher, mut rx, _cancel) = dispatcher(reads, 10, None);

        let stats = dispatcher.run();
        assert_eq!(stats.dispatched, 2);
        assert_eq!(stats.read_failures, 1);
        assert!(stats.failure.is_none());
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_global_window_is_ordered_and_bounded() {
        let (dispatcher, mut rx, _cancel) = dispatcher(frames(7), 10, Some(5));
        dispatcher.run();

        let items = drain(&mut rx);
        let first = items[0].window.as_ref().unwrap();
        assert_eq!(first.len(), 1);

        let last = items[6].window.as_ref().unwrap();
        let sequences: Vec<u64> = last.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_cancel_stops_before_reading() {
        let (dispatcher, mut rx, cancel) = dispatcher(frames(3), 10, None);
        cancel.send_replace(true);
        let stats = dispatcher.run();
        assert_eq!(stats.dispatched, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_closed_queue_stops_dispatch() {
        let (dispatcher, rx, _cancel) = dispatcher(frames(3), 10, None);
        drop(rx);
        let stats = dispatcher.run();
        assert_eq!(stats.dispatched, 0);
    }

    #[test]
    fn test_full_queue_blocks_until_consumed() {
        let (dispatcher, mut rx, _cancel) = dispatcher(frames(4), 1, None);
        let done = dispatcher.spawn().unwrap();

        let mut received = 0;
        while let Some(item) = rx.blocking_recv() {
            received += 1;
            assert_eq!(item.frame.sequence, received);
        }
        assert_eq!(received, 4);
        assert_eq!(done.blocking_recv().unwrap().dispatched, 4);
    }

    #[test]
    fn test_frame_rate_paces_reads() {
        let (dispatcher, mut rx, _cancel) = dispatcher(frames(6), 10, None);
        let started = Instant::now();
        let stats = dispatcher.with_frame_rate(50).run();

        assert_eq!(stats.dispatched, 6);
        assert_eq!(drain(&mut rx).len(), 6);
        assert!(started.elapsed() >= Duration::from_millis(6 * 20));
    }

    #[test]
    fn test_looping_source_held_to_target_rate() {
        let (tx, mut rx) = mpsc::channel(10);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let source = ScriptedSource::from_frames(vec![VideoFrame::solid(8, 8, [1, 1, 1])]).looping();
        let done = FrameDispatcher::new(Box::new(source), tx, cancel_rx, 1, None, Duration::ZERO)
            .with_frame_rate(30)
            .spawn()
            .unwrap();

        let started = Instant::now();
        let mut received = 0u64;
        while started.elapsed() < Duration::from_secs(1) {
            if rx.try_recv().is_ok() {
                received += 1;
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }
        cancel_tx.send_replace(true);
        drop(rx);

        let stats = done.blocking_recv().unwrap();
        assert!(received <= 35, "received {received} frames in one second");
        assert!(received >= 10, "received {received} frames in one second");
        assert!(stats.dispatched <= 36);
    }

    #[test]
    fn test_zero_frame_rate_is_unpaced() {
        let (dispatcher, _rx, _cancel) = dispatcher(frames(3), 10, None);
        let dispatcher = dispatcher.with_frame_rate(0);
        assert!(dispatcher.frame_interval.is_none());
    }
}
