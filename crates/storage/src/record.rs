//! Attendance record and presentation helpers

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::StorageError;

/// Attendance of one user for one class code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub user_id: String,
    pub class_code: String,
    /// UTC timestamps in recording order
    pub attendance: Vec<DateTime<Utc>>,
}

impl AttendanceRecord {
    /// One line per timestamp, converted to `offset` for display
    pub fn display_lines(&self, offset: &FixedOffset) -> Vec<String> {
        self.attendance
            .iter()
            .map(|at| {
                format!(
                    "{}  {}  {}",
                    self.user_id,
                    self.class_code,
                    at.with_timezone(offset).format("%Y-%m-%d %H:%M:%S %:z")
                )
            })
            .collect()
    }
}

/// Fields usable with `list_distinct`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    UserId,
    ClassCode,
}

impl RecordField {
    pub fn column(&self) -> &'static str {
        match self {
            RecordField::UserId => "user_id",
            RecordField::ClassCode => "class_code",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for RecordField {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_id" | "UserID" => Ok(RecordField::UserId),
            "class_code" | "classID" => Ok(RecordField::ClassCode),
            other => Err(StorageError::InvalidField(other.to_string())),
        }
    }
}

/// Parse "+07:00" / "-05:30" / "Z" into a fixed offset
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset, StorageError> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| StorageError::InvalidOffset(s.to_string()));
    }

    let invalid = || StorageError::InvalidOffset(s.to_string());
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes >= 60 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_display_converts_to_offset() {
        let record = AttendanceRecord {
            user_id: "u1".into(),
            class_code: "C1".into(),
            attendance: vec![Utc.with_ymd_and_hms(2024, 3, 1, 20, 30, 0).unwrap()],
        };
        let offset = parse_utc_offset("+07:00").unwrap();
        assert_eq!(
            record.display_lines(&offset),
            vec!["u1  C1  2024-03-02 03:30:00 +07:00".to_string()]
        );
        // Stored value is untouched
        assert_eq!(record.attendance[0].to_rfc3339(), "2024-03-01T20:30:00+00:00");
    }

    #[test]
    fn test_parse_offsets() {
        assert_eq!(parse_utc_offset("+07:00").unwrap().local_minus_utc(), 7 * 3600);
        assert_eq!(parse_utc_offset("-05:30").unwrap().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("07:00").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
    }

    #[test]
    fn test_field_names() {
        assert_eq!("classID".parse::<RecordField>().unwrap(), RecordField::ClassCode);
        assert_eq!("user_id".parse::<RecordField>().unwrap(), RecordField::UserId);
        assert!("attendance".parse::<RecordField>().is_err());
    }
}
