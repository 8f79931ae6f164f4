//! Structural and semantic checks for inbound payloads.
//!
//! These functions have no side effects. The `validate_*` entry points
//! decode raw bytes; the `check_*` functions apply the rules to an already
//! decoded message.

use crate::error::ValidationError;
use crate::event::{DoorStatus, StatusEvent};
use crate::message::{HistoryQuery, HistoryRequest, HistoryRequestMessage, UpdateMessage};

/// Decodes and validates an update payload.
///
/// # Errors
///
/// `ValidationError::Malformed` if the bytes are not an update message,
/// `ValidationError::InvalidStatus` if the status is not exactly `open` or
/// `closed`.
pub fn validate_update(payload: &[u8]) -> Result<StatusEvent, ValidationError> {
    let message: UpdateMessage = serde_json::from_slice(payload)?;
    check_update(message)
}

/// Validates a decoded update message and converts it into an event.
pub fn check_update(message: UpdateMessage) -> Result<StatusEvent, ValidationError> {
    let status: DoorStatus = message
        .status
        .parse()
        .map_err(|_| ValidationError::InvalidStatus(message.status.clone()))?;

    Ok(StatusEvent {
        door_name: message.door_name,
        status,
        changed_at: message.changed_at,
    })
}

/// Decodes and validates a history request payload.
///
/// # Errors
///
/// `ValidationError::Malformed` on decode failure, otherwise whatever
/// [`check_request`] reports.
pub fn validate_request(payload: &[u8]) -> Result<HistoryRequest, ValidationError> {
    let message: HistoryRequestMessage = serde_json::from_slice(payload)?;
    check_request(message)
}

/// Validates a decoded history request.
///
/// A reply topic is required for every request, current-value requests
/// included. Range requests additionally need both bounds, non-negative,
/// with `end >= start`.
pub fn check_request(message: HistoryRequestMessage) -> Result<HistoryRequest, ValidationError> {
    if message.return_topic.is_empty() {
        return Err(ValidationError::MissingReplyTopic);
    }

    let query = if message.current_value {
        HistoryQuery::Latest
    } else {
        let (Some(start), Some(end)) = (message.start_unix_time, message.end_unix_time) else {
            return Err(ValidationError::MissingTimeRange);
        };

        if end < start {
            return Err(ValidationError::EndBeforeStart { start, end });
        } else if start < 0 {
            return Err(ValidationError::NegativeStart(start));
        } else if end < 0 {
            return Err(ValidationError::NegativeEnd(end));
        }

        HistoryQuery::Range { start, end }
    };

    Ok(HistoryRequest {
        query,
        reply_topic: message.return_topic,
    })
}
