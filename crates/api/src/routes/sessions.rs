//! Session and Security Routes

use std::path::PathBuf;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use pipeline::SessionReport;
use security::SecurityStatus;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{ApiError, AppState};

/// Body for starting a session
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub class_code: String,
    /// Replay frames from this directory instead of the configured camera
    pub frames_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ActiveSession {
    pub session_id: Uuid,
    pub class_code: String,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub active: Option<ActiveSession>,
    pub last_report: Option<SessionReport>,
}

/// Start an authentication session
pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<ActiveSession>), ApiError> {
    state.reap_finished().await;
    let mut active = state.active.lock().await;
    if let Some(running) = active.as_ref() {
        return Err(ApiError::Conflict(format!(
            "session {} already running for {}",
            running.id(),
            running.class_code()
        )));
    }

    let mut camera = state.config.camera.clone();
    if request.frames_dir.is_some() {
        camera.frames_dir = request.frames_dir;
    }
    let source = camera_capture::open(&camera)?;
    let handle = state.service.start_session(&request.class_code, source).await?;
    metrics::counter!("faceguard_sessions_started_total", "origin" => "api").increment(1);

    let started = ActiveSession {
        session_id: handle.id(),
        class_code: handle.class_code().to_string(),
    };
    *active = Some(handle);
    Ok((StatusCode::ACCEPTED, Json(started)))
}

/// Stop the running session and return its report
pub async fn stop(State(state): State<Arc<AppState>>) -> Result<Json<SessionReport>, ApiError> {
    let handle = state
        .active
        .lock()
        .await
        .take()
        .ok_or_else(|| ApiError::NotFound("no active session".into()))?;
    info!(session = %handle.id(), "Stopping session on request");

    let report = handle.stop_and_join().await?;
    *state.last_report.lock().await = Some(report.clone());
    Ok(Json(report))
}

/// Running session, if any, and the last finished one
pub async fn current(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    state.reap_finished().await;
    let active = state.active.lock().await.as_ref().map(|handle| ActiveSession {
        session_id: handle.id(),
        class_code: handle.class_code().to_string(),
    });
    let last_report = state.last_report.lock().await.clone();
    Json(SessionsResponse { active, last_report })
}

pub async fn security_status(State(state): State<Arc<AppState>>) -> Json<SecurityStatus> {
    Json(state.service.lockout().status())
}

/// Clear the failure counter
pub async fn security_reset(State(state): State<Arc<AppState>>) -> Json<SecurityStatus> {
    state.service.lockout().reset();
    Json(state.service.lockout().status())
}
