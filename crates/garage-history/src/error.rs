//! Error types for validation and persistence.

/// Reasons an inbound payload is rejected.
///
/// Every variant is terminal for the message that produced it: the message
/// is logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The payload is not JSON of the expected shape.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The status is not exactly `"open"` or `"closed"`.
    #[error("invalid status '{0}', expected 'open' or 'closed'")]
    InvalidStatus(String),

    /// No reply topic was supplied.
    #[error("no return topic supplied")]
    MissingReplyTopic,

    /// A range request omitted one of its bounds.
    #[error("range request is missing startUnixTime or endUnixTime")]
    MissingTimeRange,

    #[error("end time {end} is before the start time {start}")]
    EndBeforeStart { start: i64, end: i64 },

    #[error("start time {0} is less than zero")]
    NegativeStart(i64),

    #[error("end time {0} is less than zero")]
    NegativeEnd(i64),
}

/// Failures of the event store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No pooled connection became available.
    #[error("history database unavailable: {0}")]
    Pool(#[from] r2d2::Error),

    /// A statement, transaction, or row conversion failed.
    #[error("history database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The history table could not be created.
    #[error(transparent)]
    Schema(#[from] garage_db::SchemaError),
}
