//! Wire shapes of the update and history-request messages.
//!
//! Field names are camelCase. The PascalCase spellings older door sensors
//! publish (`DoorName`, `LastChanged`, `ReturnTopic`, ...) are accepted as
//! aliases.

use serde::{Deserialize, Serialize};

use crate::event::{HistoryResponse, StatusEvent};

/// Raw update message as received on the update topic.
///
/// `status` is kept as a string here so an unknown value can be reported as
/// an invalid status rather than a decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessage {
    #[serde(alias = "DoorName")]
    pub door_name: String,
    #[serde(alias = "Status")]
    pub status: String,
    #[serde(alias = "LastChanged")]
    pub changed_at: i64,
}

/// Raw history request as received on the request topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequestMessage {
    /// Only the most recent event is wanted; the time bounds are ignored.
    #[serde(default, alias = "CurrentValue")]
    pub current_value: bool,
    #[serde(default, alias = "StartUnixTime")]
    pub start_unix_time: Option<i64>,
    #[serde(default, alias = "EndUnixTime")]
    pub end_unix_time: Option<i64>,
    /// Topic the results are published to.
    #[serde(default, alias = "ReturnTopic")]
    pub return_topic: String,
}

/// What a validated request asks the store for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryQuery {
    /// The single most recent event.
    Latest,
    /// Every event with `start <= changed_at <= end`.
    Range { start: i64, end: i64 },
}

/// A history request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub query: HistoryQuery,
    /// Never empty.
    pub reply_topic: String,
}

/// Failure to turn query results into a reply payload.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("event timestamp {0} cannot be represented as a date")]
    TimestampOutOfRange(i64),

    #[error("failed to serialize history response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes events as the JSON array published on a reply topic.
///
/// An empty slice yields `[]`.
pub fn encode_responses(events: &[StatusEvent]) -> Result<Vec<u8>, EncodeError> {
    let responses = events
        .iter()
        .map(|event| {
            HistoryResponse::from_event(event)
                .ok_or(EncodeError::TimestampOutOfRange(event.changed_at))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(serde_json::to_vec(&responses)?)
}
