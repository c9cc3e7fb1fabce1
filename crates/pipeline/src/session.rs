//! Authentication sessions

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::{PipelineError, SessionError, WorkerReport};

/// One recognition run against a class code.
///
/// Tracks the identities already recorded so each is recorded at most once
/// per session. A new session starts with an empty set.
#[derive(Debug, Clone)]
pub struct AuthenticationSession {
    id: Uuid,
    class_code: String,
    started_at: DateTime<Utc>,
    recorded: BTreeSet<String>,
}

impl AuthenticationSession {
    pub fn new(class_code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            class_code: class_code.into(),
            started_at: Utc::now(),
            recorded: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn class_code(&self) -> &str {
        &self.class_code
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_recorded(&self, user_id: &str) -> bool {
        self.recorded.contains(user_id)
    }

    /// Mark an identity recorded; false if it already was
    pub fn mark_recorded(&mut self, user_id: &str) -> bool {
        self.recorded.insert(user_id.to_string())
    }

    pub fn recorded(&self) -> impl Iterator<Item = &str> {
        self.recorded.iter().map(String::as_str)
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SessionOutcome {
    /// At least one identity was recorded
    Authenticated,
    /// The session ended without recording anyone
    NoIdentity,
    /// A pipeline stage failed
    Aborted { reason: String },
}

impl SessionOutcome {
    /// Whether the lockout controller counts this session as a failure
    pub fn is_failure(&self) -> bool {
        !matches!(self, SessionOutcome::Authenticated)
    }
}

/// Summary of a finished session
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub class_code: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub recorded: Vec<String>,
    pub frames_dispatched: u64,
    pub read_failures: u64,
    pub results: u64,
    pub live_results: u64,
    pub workers: Vec<WorkerReport>,
    pub outcome: SessionOutcome,
    pub lockout_engaged: bool,
}

/// Handle to a running session.
///
/// Dropping the handle cancels the session.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    class_code: String,
    cancel: watch::Sender<bool>,
    task: JoinHandle<SessionReport>,
}

impl SessionHandle {
    pub(crate) fn new(session: &AuthenticationSession, cancel: watch::Sender<bool>, task: JoinHandle<SessionReport>) -> Self {
        Self {
            id: session.id(),
            class_code: session.class_code().to_string(),
            cancel,
            task,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn class_code(&self) -> &str {
        &self.class_code
    }

    /// Signal dispatcher and workers to stop
    pub fn stop(&self) {
        if !self.cancel.send_replace(true) {
            info!(session = %self.id, "Session stop requested");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end (end of stream, or after `stop`).
    ///
    /// Resolves once; the handle should not be waited on again.
    pub async fn wait(&mut self) -> Result<SessionReport, SessionError> {
        (&mut self.task)
            .await
            .map_err(|e| SessionError::from(PipelineError::Supervisor(e.to_string())))
    }

    pub async fn join(mut self) -> Result<SessionReport, SessionError> {
        self.wait().await
    }

    pub async fn stop_and_join(self) -> Result<SessionReport, SessionError> {
        self.stop();
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_recorded_dedups() {
        let mut session = AuthenticationSession::new("C1");
        assert!(!session.is_recorded("u1"));
        assert!(session.mark_recorded("u1"));
        assert!(!session.mark_recorded("u1"));
        assert!(session.mark_recorded("u2"));
        assert_eq!(session.recorded().collect::<Vec<_>>(), vec!["u1", "u2"]);
    }

    #[test]
    fn test_new_session_starts_empty() {
        let mut first = AuthenticationSession::new("C1");
        first.mark_recorded("u1");
        let second = AuthenticationSession::new("C1");
        assert!(!second.is_recorded("u1"));
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_outcome_failure() {
        assert!(!SessionOutcome::Authenticated.is_failure());
        assert!(SessionOutcome::NoIdentity.is_failure());
        assert!(SessionOutcome::Aborted { reason: "camera".into() }.is_failure());
    }
}
