//! Garage door status history.
//!
//! Holds the append-only log of door status transitions and the message
//! types exchanged with the bus:
//!
//! | Message | Direction | Shape |
//! |---------|-----------|-------|
//! | update | inbound | `{"doorName", "status", "changedAt"}` |
//! | history request | inbound | `{"currentValue", "startUnixTime", "endUnixTime", "returnTopic"}` |
//! | history response | outbound | `[{"doorName", "timestamp", "status"}, ...]` |
//!
//! Status values are the lowercase literals `"open"` and `"closed"`, both on
//! the wire and in the `garage_history` table.
//!
//! # Usage
//!
//! ```rust,ignore
//! use garage_history::{validate_update, EventStore};
//!
//! let event = validate_update(br#"{"doorName":"left","status":"open","changedAt":1700000000}"#)?;
//! store.append(&event)?;
//! let latest = store.query_latest()?;
//! ```

mod error;
mod event;
mod message;
mod store;
mod validate;

pub use error::{StorageError, ValidationError};
pub use event::{DoorStatus, HistoryResponse, ParseDoorStatusError, StatusEvent};
pub use message::{
    encode_responses, EncodeError, HistoryQuery, HistoryRequest, HistoryRequestMessage,
    UpdateMessage,
};
pub use store::{AppendOutcome, EventStore};
pub use validate::{check_request, check_update, validate_request, validate_update};
