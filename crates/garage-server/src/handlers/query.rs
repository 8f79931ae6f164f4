//! Handler for history requests.

use async_trait::async_trait;
use garage_history::{
    encode_responses, validate_request, EncodeError, EventStore, HistoryQuery, StorageError,
    ValidationError,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::dispatcher::MessageHandler;
use crate::transport::{Publisher, TransportError};

/// Failures while answering a history request.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid history request: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to query history: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("store task failed: {0}")]
    Task(#[from] JoinError),
}

/// Summary of a reply that was published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryReply {
    pub reply_topic: String,
    /// Number of events in the published array.
    pub events: usize,
}

/// Answers history requests by publishing the matching events.
#[derive(Clone)]
pub struct QueryHandler {
    store: EventStore,
    publisher: Arc<dyn Publisher>,
    span: Span,
}

impl QueryHandler {
    pub fn new(store: EventStore, publisher: Arc<dyn Publisher>, span: Span) -> Self {
        Self {
            store,
            publisher,
            span,
        }
    }

    /// Validates `payload`, runs the query it describes, and publishes the
    /// results to the request's reply topic.
    ///
    /// Exactly one reply is published on success, `[]` when nothing
    /// matched. Nothing is published on any error.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Validation` before the store is touched if the
    /// request is rejected; otherwise the first storage, encoding or
    /// publish failure.
    pub async fn process(&self, payload: &[u8]) -> Result<QueryReply, QueryError> {
        let request = validate_request(payload)?;

        let store = self.store.clone();
        let query = request.query;
        let events = tokio::task::spawn_blocking(move || match query {
            HistoryQuery::Latest => store.query_latest(),
            HistoryQuery::Range { start, end } => store.query_range(start, end),
        })
        .await??;

        let body = encode_responses(&events)?;
        self.publisher.publish(&request.reply_topic, body).await?;

        Ok(QueryReply {
            reply_topic: request.reply_topic,
            events: events.len(),
        })
    }
}

#[async_trait]
impl MessageHandler for QueryHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let span = info_span!(
            parent: &self.span,
            "history_request",
            topic = %topic,
            payload_size = payload.len()
        );

        async {
            match self.process(payload).await {
                Ok(reply) => {
                    info!(
                        reply_topic = %reply.reply_topic,
                        events = reply.events,
                        "published history reply"
                    );
                }
                Err(QueryError::Validation(e)) => {
                    warn!(
                        error = %e,
                        payload = %String::from_utf8_lossy(payload),
                        "rejected history request"
                    );
                }
                Err(e) => {
                    error!(error = %e, "failed to answer history request");
                }
            }
        }
        .instrument(span)
        .await
    }
}
