//! Database value parsing utilities
//!
//! Provides error-safe parsing of stored values.

use chrono::{DateTime, Utc};
use rusqlite::Error as SqlError;
use uuid::Uuid;

use crate::models::{ChatHandle, DeliveryOutcome, LiveRound, PhaseKind, ReminderGroup, RoomOrigin};

fn conversion_error(message: String) -> SqlError {
    SqlError::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

/// Parse a UUID from a database string column
pub fn parse_uuid(s: &str) -> Result<Uuid, SqlError> {
    Uuid::parse_str(s).map_err(|e| {
        SqlError::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parse a DateTime from an RFC3339 string
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SqlError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            SqlError::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Parse an optional DateTime from an RFC3339 string
pub fn parse_datetime_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>, SqlError> {
    s.map(|s| parse_datetime(&s)).transpose()
}

pub fn parse_phase(s: &str) -> Result<PhaseKind, SqlError> {
    PhaseKind::from_str(s).ok_or_else(|| conversion_error(format!("unknown phase '{}'", s)))
}

pub fn parse_live_round_opt(value: Option<i64>) -> Result<Option<LiveRound>, SqlError> {
    value
        .map(|v| {
            LiveRound::from_db(v).ok_or_else(|| conversion_error(format!("invalid round {}", v)))
        })
        .transpose()
}

pub fn parse_origin(s: &str) -> Result<RoomOrigin, SqlError> {
    RoomOrigin::from_str(s).ok_or_else(|| conversion_error(format!("unknown room origin '{}'", s)))
}

pub fn parse_group(s: &str) -> Result<ReminderGroup, SqlError> {
    ReminderGroup::from_str(s)
        .ok_or_else(|| conversion_error(format!("unknown reminder group '{}'", s)))
}

pub fn parse_outcome(s: &str) -> Result<DeliveryOutcome, SqlError> {
    DeliveryOutcome::from_str(s)
        .ok_or_else(|| conversion_error(format!("unknown delivery outcome '{}'", s)))
}

pub fn parse_chat_opt(s: Option<String>) -> Option<ChatHandle> {
    s.map(ChatHandle)
}

/// Extension trait for converting rusqlite Results to Option
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, SqlError>;
}

impl<T> OptionalExt<T> for Result<T, SqlError> {
    fn optional(self) -> Result<Option<T>, SqlError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(SqlError::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
