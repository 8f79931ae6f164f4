//! Garage door history server.
//!
//! Listens on an MQTT broker for door status updates and history requests,
//! records updates in SQLite, and answers each request by publishing the
//! matching events to the reply topic named in the request.
//!
//! [`run`] owns the whole lifecycle: open the store, connect, subscribe,
//! dispatch until shutdown, then close the store and disconnect.

pub mod config;
pub mod dispatcher;
pub mod handlers;
pub mod transport;

use garage_db::{create_pool, PoolError};
use garage_history::{EventStore, StorageError};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::info_span;

use crate::config::{Config, ConfigError};
use crate::dispatcher::Dispatcher;
use crate::handlers::{QueryHandler, UpdateHandler};
use crate::transport::{MqttPublisher, TransportError};

/// Errors that stop the server. Each maps to a distinct process exit code.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open history database: {0}")]
    OpenDatabase(#[source] PoolError),

    #[error("failed to create history table: {0}")]
    CreateTable(#[source] StorageError),

    #[error(transparent)]
    Connect(TransportError),

    #[error(transparent)]
    Subscribe(TransportError),

    #[error(transparent)]
    Disconnect(TransportError),
}

impl FatalError {
    /// Process exit code reported for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Connect(_) => 1,
            Self::Subscribe(_) => 2,
            Self::Disconnect(_) => 3,
            Self::OpenDatabase(_) => 4,
            Self::CreateTable(_) => 5,
            Self::Config(_) => 6,
        }
    }
}

/// Runs the server until `shutdown` resolves.
///
/// The store is opened and its table created before the broker is
/// contacted, so a database problem never leaves a half-open session. On
/// shutdown the in-flight handlers are awaited, then the store is closed,
/// and the broker session goes last.
///
/// # Errors
///
/// Returns the first [`FatalError`] hit during startup or teardown.
/// Failures while handling individual messages are logged and never end
/// the run.
pub async fn run<F>(config: Config, shutdown: F) -> Result<(), FatalError>
where
    F: Future<Output = ()>,
{
    let pool = create_pool(&config.database.path, config.database.runtime_settings())
        .map_err(FatalError::OpenDatabase)?;
    tracing::info!(path = %config.database.path, "opened history database");

    let store = EventStore::new(pool);
    store.ensure_schema().map_err(FatalError::CreateTable)?;

    let (client, mut event_loop) = transport::connect(&config.broker)
        .await
        .map_err(FatalError::Connect)?;

    let publisher = Arc::new(MqttPublisher::new(client.clone()));
    let dispatcher = Dispatcher::new(
        config.topics.update.clone(),
        Arc::new(UpdateHandler::new(
            store.clone(),
            info_span!("updates", topic = %config.topics.update),
        )),
        config.topics.request.clone(),
        Arc::new(QueryHandler::new(
            store.clone(),
            publisher,
            info_span!("requests", topic = %config.topics.request),
        )),
        info_span!("dispatcher", broker = %config.broker.address()),
    );

    let mut tasks = JoinSet::new();
    transport::subscribe(
        &client,
        &mut event_loop,
        &dispatcher.subscriptions(),
        |topic, payload| {
            dispatcher.dispatch(&mut tasks, topic, payload);
        },
    )
    .await
    .map_err(FatalError::Subscribe)?;

    // Returns only after every in-flight handler has finished with the store.
    dispatcher
        .run(
            &client,
            &mut event_loop,
            &mut tasks,
            config.broker.reconnect_delay(),
            shutdown,
        )
        .await;

    drop(dispatcher);
    store.close();

    transport::disconnect(&client, &mut event_loop, config.broker.disconnect_timeout())
        .await
        .map_err(FatalError::Disconnect)?;

    tracing::info!("disconnected from MQTT broker");
    Ok(())
}
