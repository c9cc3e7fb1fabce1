//! Door Routes

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, Json};
use door_lock::{DoorLockController, DoorStatus};
use serde::Deserialize;

use crate::{ApiError, AppState};

/// Body for a manual unlock
#[derive(Debug, Default, Deserialize)]
pub struct UnlockRequest {
    /// Defaults to the configured unlock duration; capped by the controller
    pub duration_secs: Option<u64>,
}

fn door(state: &AppState) -> Result<&Arc<DoorLockController>, ApiError> {
    state
        .door
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("door control disabled".into()))
}

/// Current door status
pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<DoorStatus>, ApiError> {
    Ok(Json(door(&state)?.status()))
}

/// Manual unlock
pub async fn unlock(
    State(state): State<Arc<AppState>>,
    body: Option<Json<UnlockRequest>>,
) -> Result<Json<DoorStatus>, ApiError> {
    let door = door(&state)?;
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let duration = request
        .duration_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| door.config().unlock_duration());
    door.unlock(duration)?;
    metrics::counter!("faceguard_manual_unlocks_total").increment(1);
    Ok(Json(door.status()))
}

pub async fn lock(State(state): State<Arc<AppState>>) -> Result<Json<DoorStatus>, ApiError> {
    let door = door(&state)?;
    door.lock()?;
    Ok(Json(door.status()))
}

/// Software emergency release
pub async fn emergency(State(state): State<Arc<AppState>>) -> Result<Json<DoorStatus>, ApiError> {
    let door = door(&state)?;
    door.emergency_override();
    Ok(Json(door.status()))
}

pub async fn reset(State(state): State<Arc<AppState>>) -> Result<Json<DoorStatus>, ApiError> {
    let door = door(&state)?;
    door.reset_emergency_mode()?;
    Ok(Json(door.status()))
}

/// Write the status snapshot to the configured log file
pub async fn save_status_log(State(state): State<Arc<AppState>>) -> Result<Json<DoorStatus>, ApiError> {
    let door = door(&state)?;
    let status = door.save_status_log(&state.config.door.status_log_path)?;
    Ok(Json(status))
}
