//! Storage Layer
//!
//! Attendance persistence behind the [`AttendanceStore`] capability, with an
//! in-memory backend and a SQLite backend. Timestamps are stored in UTC and
//! converted to a display offset only when presented.

mod memory;
mod record;
mod sqlite;

pub use memory::InMemoryAttendanceStore;
pub use record::{parse_utc_offset, AttendanceRecord, RecordField};
pub use sqlite::SqliteAttendanceStore;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Record not found")]
    NotFound,
    #[error("Invalid field: {0}")]
    InvalidField(String),
    #[error("Invalid UTC offset: {0}")]
    InvalidOffset(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::DatabaseError(e.to_string())
    }
}

/// Attendance persistence.
///
/// One record per (user, class code) holding every attendance timestamp.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn find_session(&self, user_id: &str, class_code: &str) -> Result<Option<AttendanceRecord>, StorageError>;

    async fn insert_session(
        &self,
        user_id: &str,
        class_code: &str,
        timestamps: Vec<DateTime<Utc>>,
    ) -> Result<(), StorageError>;

    /// Append to an existing record; `NotFound` if there is none
    async fn append_timestamp(&self, user_id: &str, class_code: &str, at: DateTime<Utc>) -> Result<(), StorageError>;

    /// Delete every record, returning how many were removed
    async fn delete_all(&self) -> Result<u64, StorageError>;

    /// Distinct values of a record field, sorted
    async fn list_distinct(&self, field: RecordField) -> Result<Vec<String>, StorageError>;

    async fn list(&self) -> Result<Vec<AttendanceRecord>, StorageError>;

    /// Record one attendance: append to the existing record or create it
    async fn record_attendance(&self, user_id: &str, class_code: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        if self.find_session(user_id, class_code).await?.is_some() {
            self.append_timestamp(user_id, class_code, at).await
        } else {
            self.insert_session(user_id, class_code, vec![at]).await
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database file for the SQLite backend
    pub sqlite_path: PathBuf,
    /// Offset used when presenting timestamps, e.g. "+07:00"
    pub display_utc_offset: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            sqlite_path: PathBuf::from("data/attendance.db"),
            display_utc_offset: "+07:00".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn display_offset(&self) -> Result<FixedOffset, StorageError> {
        parse_utc_offset(&self.display_utc_offset)
    }
}

/// Open the configured backend
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn AttendanceStore>, StorageError> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory attendance store");
            Ok(Arc::new(InMemoryAttendanceStore::new()))
        }
        StorageBackend::Sqlite => {
            let store = SqliteAttendanceStore::open(&config.sqlite_path).await?;
            Ok(Arc::new(store))
        }
    }
}
