//! SQLite attendance store

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use crate::{AttendanceRecord, AttendanceStore, RecordField, StorageError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS attendance_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    class_code TEXT NOT NULL,
    UNIQUE (user_id, class_code)
);
CREATE TABLE IF NOT EXISTS attendance_times (
    session_id INTEGER NOT NULL REFERENCES attendance_sessions(id) ON DELETE CASCADE,
    at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attendance_times_session ON attendance_times(session_id);
"#;

/// Attendance store backed by a SQLite database file
pub struct SqliteAttendanceStore {
    pool: SqlitePool,
}

impl SqliteAttendanceStore {
    /// Open (creating if missing) the database at `path` and apply the schema
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::DatabaseError(format!("{}: {e}", parent.display())))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&pool).await?;
        }
        info!(path = %path.display(), "Opened SQLite attendance store");
        Ok(Self { pool })
    }

    async fn session_id(&self, user_id: &str, class_code: &str) -> Result<Option<i64>, StorageError> {
        let row = sqlx::query("SELECT id FROM attendance_sessions WHERE user_id = ? AND class_code = ?")
            .bind(user_id)
            .bind(class_code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    async fn timestamps(&self, session_id: i64) -> Result<Vec<DateTime<Utc>>, StorageError> {
        let rows = sqlx::query("SELECT at_ms FROM attendance_times WHERE session_id = ? ORDER BY rowid")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| {
                let ms: i64 = r.get("at_ms");
                DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| StorageError::DatabaseError(format!("invalid timestamp {ms}")))
            })
            .collect()
    }
}

#[async_trait]
impl AttendanceStore for SqliteAttendanceStore {
    async fn find_session(&self, user_id: &str, class_code: &str) -> Result<Option<AttendanceRecord>, StorageError> {
        let Some(id) = self.session_id(user_id, class_code).await? else {
            return Ok(None);
        };
        Ok(Some(AttendanceRecord {
            user_id: user_id.to_string(),
            class_code: class_code.to_string(),
            attendance: self.timestamps(id).await?,
        }))
    }

    async fn insert_session(
        &self,
        user_id: &str,
        class_code: &str,
        timestamps: Vec<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        let id = sqlx::query("INSERT INTO attendance_sessions (user_id, class_code) VALUES (?, ?)")
            .bind(user_id)
            .bind(class_code)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
        for at in timestamps {
            sqlx::query("INSERT INTO attendance_times (session_id, at_ms) VALUES (?, ?)")
                .bind(id)
                .bind(at.timestamp_millis())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!(user_id, class_code, "Inserted attendance record");
        Ok(())
    }

    async fn append_timestamp(&self, user_id: &str, class_code: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let id = self
            .session_id(user_id, class_code)
            .await?
            .ok_or(StorageError::NotFound)?;
        sqlx::query("INSERT INTO attendance_times (session_id, at_ms) VALUES (?, ?)")
            .bind(id)
            .bind(at.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM attendance_times").execute(&mut *tx).await?;
        let removed = sqlx::query("DELETE FROM attendance_sessions")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        info!(removed, "Deleted all attendance records");
        Ok(removed)
    }

    async fn list_distinct(&self, field: RecordField) -> Result<Vec<String>, StorageError> {
        // Column name comes from a closed enum, never from user input
        let sql = format!(
            "SELECT DISTINCT {col} FROM attendance_sessions ORDER BY {col}",
            col = field.column()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
    }

    async fn list(&self) -> Result<Vec<AttendanceRecord>, StorageError> {
        let rows = sqlx::query("SELECT id, user_id, class_code FROM attendance_sessions ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(AttendanceRecord {
                user_id: row.get("user_id"),
                class_code: row.get("class_code"),
                attendance: self.timestamps(row.get("id")).await?,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 8, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_record_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("attendance.db");

        {
            let store = SqliteAttendanceStore::open(&path).await.unwrap();
            store.record_attendance("u1", "C1", at(0)).await.unwrap();
            store.record_attendance("u1", "C1", at(3)).await.unwrap();
            store.record_attendance("u2", "C1", at(4)).await.unwrap();
        }

        let store = SqliteAttendanceStore::open(&path).await.unwrap();
        let record = store.find_session("u1", "C1").await.unwrap().unwrap();
        assert_eq!(record.attendance, vec![at(0), at(3)]);
        assert_eq!(store.list().await.unwrap().len(), 2);
        assert_eq!(store.list_distinct(RecordField::UserId).await.unwrap(), vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_sqlite_append_missing_and_delete_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteAttendanceStore::open(&dir.path().join("a.db")).await.unwrap();

        assert!(matches!(
            store.append_timestamp("u1", "C1", at(0)).await,
            Err(StorageError::NotFound)
        ));

        store.insert_session("u1", "C1", vec![at(0), at(1)]).await.unwrap();
        assert_eq!(store.delete_all().await.unwrap(), 1);
        assert!(store.find_session("u1", "C1").await.unwrap().is_none());
        assert!(store.list_distinct(RecordField::ClassCode).await.unwrap().is_empty());
    }
}
