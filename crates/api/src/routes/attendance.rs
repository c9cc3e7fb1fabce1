//! Attendance and Enrollment Routes

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;
use storage::RecordField;

use crate::{ApiError, AppState};

/// One attendance record, timestamps in the display timezone
#[derive(Debug, Serialize)]
pub struct AttendanceEntry {
    pub user_id: String,
    pub class_code: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AttendanceResponse {
    pub data: Vec<AttendanceEntry>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub references: usize,
    pub identities: usize,
}

pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<AttendanceResponse>, ApiError> {
    let records = state.service.store().list().await?;
    let data: Vec<AttendanceEntry> = records
        .iter()
        .map(|record| AttendanceEntry {
            user_id: record.user_id.clone(),
            class_code: record.class_code.clone(),
            lines: record.display_lines(&state.display_offset),
        })
        .collect();
    Ok(Json(AttendanceResponse {
        count: data.len(),
        data,
    }))
}

pub async fn delete_all(State(state): State<Arc<AppState>>) -> Result<Json<DeletedResponse>, ApiError> {
    let deleted = state.service.store().delete_all().await?;
    Ok(Json(DeletedResponse { deleted }))
}

/// Distinct class codes seen in the store
pub async fn classes(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.service.store().list_distinct(RecordField::ClassCode).await?))
}

/// Re-read the enrollment directory
pub async fn reload_enrollment(State(state): State<Arc<AppState>>) -> Result<Json<ReloadResponse>, ApiError> {
    let registry = Arc::clone(state.service.registry());
    let references = tokio::task::spawn_blocking(move || registry.reload())
        .await
        .map_err(|e| ApiError::Internal(format!("enrollment reload interrupted: {e}")))??;
    Ok(Json(ReloadResponse {
        references,
        identities: state.service.registry().snapshot().identities().len(),
    }))
}
