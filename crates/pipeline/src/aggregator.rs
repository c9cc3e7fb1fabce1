//! Decision Aggregator
//!
//! Consumes match results, records attendance once per identity per session
//! and grants the door on every live match.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use door_lock::{DoorLockController, LockError};
use face_match::Identity;
use metrics::counter;
use serde::Serialize;
use storage::AttendanceStore;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::overlay::PreviewWriter;
use crate::session::AuthenticationSession;
use crate::MatchResult;

/// What happened to one result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Recorded,
    /// Live match for an identity already recorded this session
    Duplicate,
    NotLive,
    Unknown,
    /// Store write failed; a later live frame retries
    StoreFailed,
}

/// Aggregator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregatorStats {
    pub results: u64,
    pub live_results: u64,
    pub recorded: u64,
    pub store_failures: u64,
    pub door_grants: u64,
}

/// Decision aggregator
pub struct DecisionAggregator {
    session: AuthenticationSession,
    store: Arc<dyn AttendanceStore>,
    door: Option<(Arc<DoorLockController>, Duration)>,
    preview: Option<PreviewWriter>,
    stats: AggregatorStats,
}

impl DecisionAggregator {
    pub fn new(session: AuthenticationSession, store: Arc<dyn AttendanceStore>) -> Self {
        Self {
            session,
            store,
            door: None,
            preview: None,
            stats: AggregatorStats::default(),
        }
    }

    /// Unlock `door` for `duration` on every live match
    pub fn with_door(mut self, door: Arc<DoorLockController>, duration: Duration) -> Self {
        self.door = Some((door, duration));
        self
    }

    pub fn with_preview(mut self, preview: PreviewWriter) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn session(&self) -> &AuthenticationSession {
        &self.session
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    pub async fn handle(&mut self, result: &MatchResult) -> Decision {
        self.stats.results += 1;
        if let Some(preview) = &self.preview {
            preview.write(result);
        }

        let Identity::Known(user_id) = &result.identity else {
            return Decision::Unknown;
        };
        if !result.live {
            return Decision::NotLive;
        }
        self.stats.live_results += 1;
        self.grant(user_id);

        if self.session.is_recorded(user_id) {
            return Decision::Duplicate;
        }

        let class_code = self.session.class_code();
        match self.store.record_attendance(user_id, class_code, Utc::now()).await {
            Ok(()) => {
                self.session.mark_recorded(user_id);
                self.stats.recorded += 1;
                counter!("faceguard_attendance_recorded_total").increment(1);
                info!(
                    user_id = %user_id,
                    class_code = %self.session.class_code(),
                    confidence = result.confidence,
                    sequence = result.sequence,
                    "Attendance recorded"
                );
                Decision::Recorded
            }
            Err(e) => {
                self.stats.store_failures += 1;
                error!(user_id = %user_id, error = %e, "Attendance write failed, skipped");
                Decision::StoreFailed
            }
        }
    }

    fn grant(&mut self, user_id: &str) {
        let Some((door, duration)) = &self.door else {
            return;
        };
        match door.unlock(*duration) {
            Ok(()) => {
                self.stats.door_grants += 1;
                info!(user_id, "Door granted");
            }
            Err(LockError::InvalidTransition { from }) => {
                debug!(user_id, state = %from, "Door grant ignored");
            }
            Err(LockError::EmergencyActive) => {
                warn!(user_id, "Door grant ignored, emergency mode active");
            }
            Err(e) => {
                error!(user_id, error = %e, "Door grant failed");
            }
        }
    }

    /// Consume results until every worker has stopped
    pub async fn run(mut self, mut results: mpsc::Receiver<MatchResult>) -> (AuthenticationSession, AggregatorStats) {
        info!(session = %self.session.id(), class_code = %self.session.class_code(), "Starting decision aggregator");
        while let Some(result) = results.recv().await {
            let decision = self.handle(&result).await;
            debug!(sequence = result.sequence, ?decision, "Result aggregated");
        }
        info!(
            recorded = self.stats.recorded,
            results = self.stats.results,
            "Decision aggregator stopped"
        );
        (self.session, self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::VideoFrame;
    use door_lock::{DoorConfig, DoorHardware, LockState};
    use face_match::FaceBox;
    use storage::InMemoryAttendanceStore;

    fn result(identity: Identity, live: bool, sequence: u64) -> MatchResult {
        MatchResult {
            identity,
            confidence: 95.0,
            live,
            face_box: FaceBox::new(10, 60, 60, 10),
            sequence,
            worker: 0,
            frame: Arc::new(VideoFrame::solid(80, 80, [0, 0, 0])),
        }
    }

    fn u1(live: bool, sequence: u64) -> MatchResult {
        result(Identity::Known("u1".into()), live, sequence)
    }

    #[tokio::test]
    async fn test_dedup_across_ten_frames() {
        let store = Arc::new(InMemoryAttendanceStore::new());
        let mut aggregator = DecisionAggregator::new(AuthenticationSession::new("C1"), store.clone());

        let mut decisions = Vec::new();
        for seq in 1..=10 {
            decisions.push(aggregator.handle(&u1(true, seq)).await);
        }
        assert_eq!(decisions[0], Decision::Recorded);
        assert!(decisions[1..].iter().all(|d| *d == Decision::Duplicate));

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attendance.len(), 1);
        assert_eq!(aggregator.stats().recorded, 1);
    }

    #[tokio::test]
    async fn test_unknown_and_not_live_discarded() {
        let store = Arc::new(InMemoryAttendanceStore::new());
        let mut aggregator = DecisionAggregator::new(AuthenticationSession::new("C1"), store.clone());

        assert_eq!(aggregator.handle(&result(Identity::Unknown, false, 1)).await, Decision::Unknown);
        assert_eq!(aggregator.handle(&u1(false, 2)).await, Decision::NotLive);
        assert!(store.list().await.unwrap().is_empty());
        assert!(!aggregator.session().is_recorded("u1"));
    }

    #[tokio::test]
    async fn test_store_failure_retried_on_next_live_frame() {
        let store = Arc::new(InMemoryAttendanceStore::new());
        store.set_fail_writes(true);
        let mut aggregator = DecisionAggregator::new(AuthenticationSession::new("C1"), store.clone());

        assert_eq!(aggregator.handle(&u1(true, 1)).await, Decision::StoreFailed);
        store.set_fail_writes(false);
        assert_eq!(aggregator.handle(&u1(true, 2)).await, Decision::Recorded);
        assert_eq!(aggregator.stats().store_failures, 1);
    }

    #[tokio::test]
    async fn test_existing_record_gets_new_timestamp() {
        let store = Arc::new(InMemoryAttendanceStore::new());
        store.insert_session("u1", "C1", vec![Utc::now()]).await.unwrap();

        let mut aggregator = DecisionAggregator::new(AuthenticationSession::new("C1"), store.clone());
        aggregator.handle(&u1(true, 1)).await;

        let record = store.find_session("u1", "C1").await.unwrap().unwrap();
        assert_eq!(record.attendance.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_match_unlocks_door() {
        let config = DoorConfig::default();
        let (hardware, _handles) = DoorHardware::simulated(&config);
        let door = DoorLockController::new(config, hardware.lock_pin, hardware.sensor).unwrap();

        let store = Arc::new(InMemoryAttendanceStore::new());
        let mut aggregator = DecisionAggregator::new(AuthenticationSession::new("C1"), store)
            .with_door(Arc::clone(&door), Duration::from_secs(5));

        aggregator.handle(&u1(true, 1)).await;
        assert_eq!(door.state(), LockState::Unlocked);

        // Already unlocked: second grant is rejected without changing state
        aggregator.handle(&u1(true, 2)).await;
        assert_eq!(aggregator.stats().door_grants, 1);
        assert_eq!(door.status().unlock_count, 1);
    }

    #[tokio::test]
    async fn test_run_returns_session_when_channel_closes() {
        let store = Arc::new(InMemoryAttendanceStore::new());
        let (tx, rx) = mpsc::channel(4);
        let aggregator = DecisionAggregator::new(AuthenticationSession::new("C1"), store);
        let handle = tokio::spawn(aggregator.run(rx));

        tx.send(u1(true, 1)).await.unwrap();
        tx.send(result(Identity::Known("u2".into()), true, 2)).await.unwrap();
        drop(tx);

        let (session, stats) = handle.await.unwrap();
        assert_eq!(session.recorded().collect::<Vec<_>>(), vec!["u1", "u2"]);
        assert_eq!(stats.results, 2);
    }
}
