//! MQTT transport: broker session setup, subscription, publishing, teardown.
//!
//! The broker client itself is `rumqttc`. This module only drives its event
//! loop through the startup handshake and exposes publishing behind the
//! [`Publisher`] trait so handlers can be tested without a broker.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet,
    QoS, SubscribeFilter, SubscribeReasonCode,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::BrokerConfig;

/// QoS used for subscriptions and replies.
pub const DELIVERY_QOS: QoS = QoS::ExactlyOnce;

/// Failures of the MQTT transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to MQTT broker {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: ConnectionError,
    },

    #[error("failed to subscribe to [{topics}]: {reason}")]
    Subscribe { topics: String, reason: String },

    #[error("failed to publish to '{topic}': {source}")]
    Publish {
        topic: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to disconnect from MQTT broker: {0}")]
    Disconnect(String),
}

/// Outbound half of the transport used by the query handler.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `payload` to `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// [`Publisher`] over a live `rumqttc` client.
///
/// Messages go out at [`DELIVERY_QOS`] and are not retained.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, DELIVERY_QOS, false, payload)
            .await
            .map_err(|source| TransportError::Publish {
                topic: topic.to_string(),
                source,
            })
    }
}

/// Builds client options from the broker configuration.
///
/// Credentials are attached only when a non-empty username is configured.
pub fn mqtt_options(config: &BrokerConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(true);

    if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
        options.set_credentials(username, config.password.as_deref().unwrap_or_default());
    }

    options
}

/// Opens a broker session and waits for the broker's CONNACK.
///
/// # Errors
///
/// Returns `TransportError::Connect` if the TCP connection fails or the
/// broker refuses the session.
pub async fn connect(config: &BrokerConfig) -> Result<(AsyncClient, EventLoop), TransportError> {
    let (client, mut event_loop) = AsyncClient::new(mqtt_options(config), config.request_capacity);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(
                    address = %config.address(),
                    session_present = ack.session_present,
                    "connected to MQTT broker"
                );
                return Ok((client, event_loop));
            }
            Ok(_) => {}
            Err(source) => {
                return Err(TransportError::Connect {
                    address: config.address(),
                    source,
                })
            }
        }
    }
}

/// Subscribes to `subscriptions` and waits for the broker's SUBACK.
///
/// The broker may deliver matching messages before the SUBACK, and the
/// client has already acknowledged them by the time they surface here, so
/// each one is handed to `on_publish` as `(topic, payload)`.
///
/// # Errors
///
/// Returns `TransportError::Subscribe` if the request cannot be queued, the
/// connection drops before the SUBACK, or the broker rejects any filter.
pub async fn subscribe<F>(
    client: &AsyncClient,
    event_loop: &mut EventLoop,
    subscriptions: &[(String, QoS)],
    mut on_publish: F,
) -> Result<(), TransportError>
where
    F: FnMut(String, Vec<u8>),
{
    let topics = subscriptions
        .iter()
        .map(|(topic, _)| topic.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let failed = |reason: String| TransportError::Subscribe {
        topics: topics.clone(),
        reason,
    };

    client
        .subscribe_many(subscribe_filters(subscriptions))
        .await
        .map_err(|e| failed(e.to_string()))?;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    return Err(failed(format!(
                        "broker rejected subscription: {:?}",
                        ack.return_codes
                    )));
                }
                info!(topics = %topics, "subscribed to topics");
                return Ok(());
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(topic = %publish.topic, "message arrived before SUBACK");
                on_publish(publish.topic, publish.payload.to_vec());
            }
            Ok(_) => {}
            Err(e) => return Err(failed(e.to_string())),
        }
    }
}

pub(crate) fn subscribe_filters(subscriptions: &[(String, QoS)]) -> Vec<SubscribeFilter> {
    subscriptions
        .iter()
        .map(|(topic, qos)| SubscribeFilter::new(topic.clone(), *qos))
        .collect()
}

/// Sends DISCONNECT and drives the event loop until it has gone out.
///
/// # Errors
///
/// Returns `TransportError::Disconnect` if the request cannot be queued, the
/// connection fails first, or `timeout` elapses.
pub async fn disconnect(
    client: &AsyncClient,
    event_loop: &mut EventLoop,
    timeout: Duration,
) -> Result<(), TransportError> {
    client
        .disconnect()
        .await
        .map_err(|e| TransportError::Disconnect(e.to_string()))?;

    let drain = async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(TransportError::Disconnect(e.to_string())),
            }
        }
    };

    tokio::time::timeout(timeout, drain).await.map_err(|_| {
        TransportError::Disconnect(format!(
            "DISCONNECT not sent within {}ms",
            timeout.as_millis()
        ))
    })?
}
