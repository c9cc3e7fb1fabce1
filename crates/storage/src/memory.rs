//! In-memory attendance store

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{AttendanceRecord, AttendanceStore, RecordField, StorageError};

/// Attendance store kept in process memory
pub struct InMemoryAttendanceStore {
    records: Mutex<Vec<AttendanceRecord>>,
    /// Reject writes (simulates an unreachable backend)
    fail_writes: AtomicBool,
}

impl InMemoryAttendanceStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make subsequent writes fail until cleared
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::DatabaseError("store unavailable".into()));
        }
        Ok(())
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, Vec<AttendanceRecord>>, StorageError> {
        self.records
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))
    }
}

impl Default for InMemoryAttendanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttendanceStore for InMemoryAttendanceStore {
    async fn find_session(&self, user_id: &str, class_code: &str) -> Result<Option<AttendanceRecord>, StorageError> {
        Ok(self
            .records()?
            .iter()
            .find(|r| r.user_id == user_id && r.class_code == class_code)
            .cloned())
    }

    async fn insert_session(
        &self,
        user_id: &str,
        class_code: &str,
        timestamps: Vec<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut records = self.records()?;
        records.push(AttendanceRecord {
            user_id: user_id.to_string(),
            class_code: class_code.to_string(),
            attendance: timestamps,
        });
        debug!(user_id, class_code, "Inserted attendance record");
        Ok(())
    }

    async fn append_timestamp(&self, user_id: &str, class_code: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut records = self.records()?;
        let record = records
            .iter_mut()
            .find(|r| r.user_id == user_id && r.class_code == class_code)
            .ok_or(StorageError::NotFound)?;
        record.attendance.push(at);
        Ok(())
    }

    async fn delete_all(&self) -> Result<u64, StorageError> {
        self.check_writable()?;
        let mut records = self.records()?;
        let removed = records.len() as u64;
        records.clear();
        info!(removed, "Deleted all attendance records");
        Ok(removed)
    }

    async fn list_distinct(&self, field: RecordField) -> Result<Vec<String>, StorageError> {
        let records = self.records()?;
        let values: BTreeSet<&str> = records
            .iter()
            .map(|r| match field {
                RecordField::UserId => r.user_id.as_str(),
                RecordField::ClassCode => r.class_code.as_str(),
            })
            .collect();
        Ok(values.into_iter().map(String::from).collect())
    }

    async fn list(&self) -> Result<Vec<AttendanceRecord>, StorageError> {
        Ok(self.records()?.clone())
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
    async fn test_record_attendance_inserts_then_appends() {
        let store = InMemoryAttendanceStore::new();
        store.record_attendance("u1", "C1", at(0)).await.unwrap();
        store.record_attendance("u1", "C1", at(5)).await.unwrap();
        store.record_attendance("u1", "C2", at(6)).await.unwrap();

        let record = store.find_session("u1", "C1").await.unwrap().unwrap();
        assert_eq!(record.attendance, vec![at(0), at(5)]);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_append_without_record_is_not_found() {
        let store = InMemoryAttendanceStore::new();
        assert!(matches!(
            store.append_timestamp("u1", "C1", at(0)).await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_distinct_and_delete_all() {
        let store = InMemoryAttendanceStore::new();
        store.insert_session("u2", "C1", vec![at(0)]).await.unwrap();
        store.insert_session("u1", "C1", vec![at(1)]).await.unwrap();
        store.insert_session("u1", "C2", vec![at(2)]).await.unwrap();

        assert_eq!(store.list_distinct(RecordField::ClassCode).await.unwrap(), vec!["C1", "C2"]);
        assert_eq!(store.list_distinct(RecordField::UserId).await.unwrap(), vec!["u1", "u2"]);

        assert_eq!(store.delete_all().await.unwrap(), 3);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_injection() {
        let store = InMemoryAttendanceStore::new();
        store.set_fail_writes(true);
        assert!(store.record_attendance("u1", "C1", at(0)).await.is_err());
        store.set_fail_writes(false);
        store.record_attendance("u1", "C1", at(0)).await.unwrap();
    }
}
