//! Topic routing for inbound MQTT messages.
//!
//! The dispatcher owns a table from exact topic name to handler. Each
//! inbound message is handed to its handler on a fresh Tokio task, so a slow
//! query never holds up an update and a panicking handler only takes down
//! its own task. Tasks are collected in a [`JoinSet`] so shutdown can wait
//! for the ones still running.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::transport::{subscribe_filters, DELIVERY_QOS};

/// Consumer of messages arriving on one topic.
///
/// Implementations log their own failures; nothing is reported back to the
/// transport.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: &[u8]);
}

/// Routes messages by topic to the update and query handlers.
pub struct Dispatcher {
    routes: HashMap<String, Arc<dyn MessageHandler>>,
    span: Span,
}

impl Dispatcher {
    /// Binds the update topic and the request topic to their handlers.
    ///
    /// The two topics are expected to differ (see
    /// [`Config::validate`](crate::config::Config::validate)).
    pub fn new(
        update_topic: impl Into<String>,
        update_handler: Arc<dyn MessageHandler>,
        request_topic: impl Into<String>,
        query_handler: Arc<dyn MessageHandler>,
        span: Span,
    ) -> Self {
        let mut routes: HashMap<String, Arc<dyn MessageHandler>> = HashMap::with_capacity(2);
        routes.insert(update_topic.into(), update_handler);
        routes.insert(request_topic.into(), query_handler);
        Self { routes, span }
    }

    /// Topic filters to subscribe to, in a stable order.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        let mut topics: Vec<(String, QoS)> = self
            .routes
            .keys()
            .map(|topic| (topic.clone(), DELIVERY_QOS))
            .collect();
        topics.sort_by(|a, b| a.0.cmp(&b.0));
        topics
    }

    /// Looks up the handler bound to exactly `topic`.
    pub fn route(&self, topic: &str) -> Option<Arc<dyn MessageHandler>> {
        self.routes.get(topic).cloned()
    }

    /// Spawns the handler for `topic` into `tasks`.
    ///
    /// Returns `false` and drops the message when no handler is bound.
    pub fn dispatch(&self, tasks: &mut JoinSet<()>, topic: String, payload: Vec<u8>) -> bool {
        let Some(handler) = self.route(&topic) else {
            self.span.in_scope(|| {
                warn!(topic = %topic, payload_size = payload.len(), "no handler for topic, dropping message");
            });
            return false;
        };

        tasks.spawn(
            async move { handler.handle(&topic, &payload).await }.instrument(self.span.clone()),
        );
        true
    }

    /// Drives the MQTT event loop until `shutdown` resolves, then waits for
    /// every handler task in `tasks` to finish.
    ///
    /// Incoming publishes are dispatched; a CONNACK seen here means the
    /// client reconnected, so the subscriptions are renewed. Connection
    /// errors are logged and retried after `reconnect_delay`.
    pub async fn run<F>(
        &self,
        client: &AsyncClient,
        event_loop: &mut EventLoop,
        tasks: &mut JoinSet<()>,
        reconnect_delay: Duration,
        shutdown: F,
    ) where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        async {
            info!("waiting for requests or updates");
            'events: loop {
                tokio::select! {
                    () = &mut shutdown => {
                        info!("shutdown requested, stopping dispatcher");
                        break 'events;
                    }
                    Some(joined) = tasks.join_next() => log_task_outcome(joined),
                    event = event_loop.poll() => match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            self.dispatch(tasks, publish.topic, publish.payload.to_vec());
                        }
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("reconnected to MQTT broker, renewing subscriptions");
                            let filters = subscribe_filters(&self.subscriptions());
                            if let Err(e) = client.try_subscribe_many(filters) {
                                error!(error = %e, "failed to renew subscriptions");
                            }
                        }
                        Ok(Event::Incoming(Packet::SubAck(ack))) => {
                            debug!(return_codes = ?ack.return_codes, "subscription acknowledged");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(
                                error = %e,
                                retry_in_ms = reconnect_delay.as_millis() as u64,
                                "MQTT connection error, retrying"
                            );
                            tokio::select! {
                                () = &mut shutdown => {
                                    info!("shutdown requested while reconnecting");
                                    break 'events;
                                }
                                () = tokio::time::sleep(reconnect_delay) => {}
                            }
                        }
                    }
                }
            }

            if !tasks.is_empty() {
                info!(in_flight = tasks.len(), "waiting for in-flight handlers");
            }
            while let Some(joined) = tasks.join_next().await {
                log_task_outcome(joined);
            }
        }
        .instrument(self.span.clone())
        .await
    }
}

fn log_task_outcome(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "message handler task failed");
    }
}
