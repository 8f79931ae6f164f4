//! Handler for door status updates.
//!
//! A valid update is appended to the history store; a redelivered one is
//! recognised there and reported as a duplicate.

use async_trait::async_trait;
use garage_history::{
    validate_update, AppendOutcome, EventStore, StatusEvent, StorageError, ValidationError,
};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::dispatcher::MessageHandler;

/// Failures while recording a status update.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("invalid update: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to store update: {0}")]
    Storage(#[from] StorageError),

    #[error("store task failed: {0}")]
    Task(#[from] JoinError),
}

/// Records door status updates in the history store.
#[derive(Clone)]
pub struct UpdateHandler {
    store: EventStore,
    span: Span,
}

impl UpdateHandler {
    pub fn new(store: EventStore, span: Span) -> Self {
        Self { store, span }
    }

    /// Validates `payload` and appends the event it describes.
    ///
    /// # Errors
    ///
    /// Returns `UpdateError::Validation` without touching the store if the
    /// payload is rejected, otherwise any storage or task failure.
    pub async fn process(&self, payload: &[u8]) -> Result<(StatusEvent, AppendOutcome), UpdateError> {
        let event = validate_update(payload)?;

        let store = self.store.clone();
        let stored = event.clone();
        let outcome = tokio::task::spawn_blocking(move || store.append(&stored)).await??;

        Ok((event, outcome))
    }
}

#[async_trait]
impl MessageHandler for UpdateHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let span = info_span!(
            parent: &self.span,
            "update_message",
            topic = %topic,
            payload_size = payload.len()
        );

        async {
            match self.process(payload).await {
                Ok((event, AppendOutcome::Inserted)) => {
                    info!(
                        door = %event.door_name,
                        status = %event.status,
                        changed_at = event.changed_at,
                        "recorded door status"
                    );
                }
                Ok((event, AppendOutcome::Duplicate)) => {
                    debug!(
                        door = %event.door_name,
                        changed_at = event.changed_at,
                        "update already recorded, ignoring redelivery"
                    );
                }
                Err(UpdateError::Validation(e)) => {
                    warn!(
                        error = %e,
                        payload = %String::from_utf8_lossy(payload),
                        "rejected update"
                    );
                }
                Err(e) => {
                    error!(error = %e, "failed to record update");
                }
            }
        }
        .instrument(span)
        .await
    }
}
