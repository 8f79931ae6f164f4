//! Door status and the event records built from it.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Position of a garage door.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoorStatus {
    Open,
    Closed,
}

impl DoorStatus {
    /// Returns the wire and storage literal for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for DoorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DoorStatus {
    type Err = ParseDoorStatusError;

    /// Case-sensitive: only `open` and `closed` are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            _ => Err(ParseDoorStatusError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown door status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDoorStatusError(pub String);

impl std::fmt::Display for ParseDoorStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown door status: {}", self.0)
    }
}

impl std::error::Error for ParseDoorStatusError {}

impl ToSql for DoorStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for DoorStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// A single recorded status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// Identifier of the door, stored as `garage_id`.
    pub door_name: String,
    pub status: DoorStatus,
    /// Seconds since the Unix epoch.
    pub changed_at: i64,
}

/// One element of the array published in reply to a history request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub door_name: String,
    /// Serialized as an RFC 3339 UTC timestamp.
    pub timestamp: DateTime<Utc>,
    pub status: DoorStatus,
}

impl HistoryResponse {
    /// Projects a stored event into its response form.
    ///
    /// Returns `None` when `changed_at` is outside the range `chrono` can
    /// represent.
    pub fn from_event(event: &StatusEvent) -> Option<Self> {
        let timestamp = DateTime::from_timestamp(event.changed_at, 0)?;
        Some(Self {
            door_name: event.door_name.clone(),
            timestamp,
            status: event.status,
        })
    }
}
