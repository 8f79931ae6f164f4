//! Garage history server binary.
//!
//! Loads configuration, sets up structured logging, and runs the server
//! until SIGTERM/SIGINT. The process exit code identifies which startup or
//! teardown step failed.

use garage_server::config::{load_config, Config};
use garage_server::FatalError;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("GARAGE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn init_tracing(config: &Config) {
    let (filter, invalid_level) = match EnvFilter::try_new(&config.logging.level) {
        Ok(filter) => (filter, None),
        Err(e) => (EnvFilter::new("info"), Some(e)),
    };

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    if let Some(e) = invalid_level {
        tracing::warn!(
            level = %config.logging.level,
            error = %e,
            "invalid log level, falling back to info"
        );
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Logging is configured from the file, so a bad file can only go to stderr.
    let config = match load_config(selected_config_path) {
        Ok(config) => config,
        Err(e) => {
            let fatal = FatalError::from(e);
            eprintln!("garage-server: {fatal}");
            return ExitCode::from(fatal.exit_code());
        }
    };

    init_tracing(&config);

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );
    tracing::info!(
        broker = %config.broker.address(),
        update_topic = %config.topics.update,
        request_topic = %config.topics.request,
        "starting garage history server"
    );

    match garage_server::run(config, shutdown_signal()).await {
        Ok(()) => {
            tracing::info!("garage history server shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, exit_code = e.exit_code(), "garage history server failed");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
///
/// If a handler cannot be installed that signal is logged and ignored; the
/// other one still triggers shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
