//! Server configuration loading from file and environment variables.

use garage_db::DbRuntimeSettings;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// MQTT broker connection settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Topics the server listens on.
    #[serde(default)]
    pub topics: TopicConfig,

    /// History database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Credentials are only sent when a non-empty username is configured.
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Pause between reconnect attempts after the connection drops.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// How long shutdown waits for the DISCONNECT packet to go out.
    #[serde(default = "default_disconnect_timeout_ms")]
    pub disconnect_timeout_ms: u64,

    /// Capacity of the client's outgoing request queue.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

/// Topic names for inbound messages.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicConfig {
    /// Door status updates arrive here.
    #[serde(default = "default_update_topic")]
    pub update: String,

    /// History requests arrive here.
    #[serde(default = "default_request_topic")]
    pub request: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_db_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_db_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "garage_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "GarageHistoryServer".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_disconnect_timeout_ms() -> u64 {
    5_000
}

fn default_request_capacity() -> usize {
    64
}

fn default_update_topic() -> String {
    "home/garage/door/update".to_string()
}

fn default_request_topic() -> String {
    "home/server/garage/historyrequest".to_string()
}

fn default_db_path() -> String {
    "./GarageHistory.db".to_string()
}

fn default_db_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_db_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: None,
            password: None,
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            disconnect_timeout_ms: default_disconnect_timeout_ms(),
            request_capacity: default_request_capacity(),
        }
    }
}

impl BrokerConfig {
    /// `host:port` form used in log lines and errors.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            update: default_update_topic(),
            request: default_request_topic(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_db_busy_timeout_ms(),
            pool_max_size: default_db_pool_max_size(),
        }
    }
}

impl DatabaseConfig {
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
            ..DbRuntimeSettings::default()
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Checks the values no default can fix.
    ///
    /// Routing is by exact topic name, so both topics must be non-empty,
    /// distinct, and free of MQTT wildcards.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, topic) in [
            ("topics.update", &self.topics.update),
            ("topics.request", &self.topics.request),
        ] {
            if topic.is_empty() {
                return Err(ConfigError::Invalid(format!("{name} must not be empty")));
            }
            if topic.contains(['+', '#']) {
                return Err(ConfigError::Invalid(format!(
                    "{name} '{topic}' must not contain MQTT wildcards"
                )));
            }
        }

        if self.topics.update == self.topics.request {
            return Err(ConfigError::Invalid(format!(
                "topics.update and topics.request must differ, both are '{}'",
                self.topics.update
            )));
        }

        Ok(())
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `GARAGE_BROKER_HOST` overrides `broker.host`
/// - `GARAGE_BROKER_PORT` overrides `broker.port`
/// - `GARAGE_BROKER_USERNAME` overrides `broker.username`
/// - `GARAGE_BROKER_PASSWORD` overrides `broker.password`
/// - `GARAGE_UPDATE_TOPIC` overrides `topics.update`
/// - `GARAGE_REQUEST_TOPIC` overrides `topics.request`
/// - `GARAGE_DB_PATH` overrides `database.path`
/// - `GARAGE_LOG_LEVEL` overrides `logging.level`
/// - `GARAGE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting configuration fails [`Config::validate`].
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit environment lookup.
pub fn load_config_with_env<F>(path: Option<&str>, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Some(host) = env("GARAGE_BROKER_HOST") {
        config.broker.host = host;
    }
    if let Some(port) = env("GARAGE_BROKER_PORT") {
        if let Ok(parsed) = port.parse() {
            config.broker.port = parsed;
        }
    }
    if let Some(username) = env("GARAGE_BROKER_USERNAME") {
        config.broker.username = Some(username);
    }
    if let Some(password) = env("GARAGE_BROKER_PASSWORD") {
        config.broker.password = Some(password);
    }
    if let Some(topic) = env("GARAGE_UPDATE_TOPIC") {
        config.topics.update = topic;
    }
    if let Some(topic) = env("GARAGE_REQUEST_TOPIC") {
        config.topics.request = topic;
    }
    if let Some(db_path) = env("GARAGE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = env("GARAGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("GARAGE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let config = load_config_with_env(None, no_env).expect("defaults should be valid");

        assert_eq!(config.broker.address(), "localhost:1883");
        assert_eq!(config.broker.client_id, "GarageHistoryServer");
        assert!(config.broker.username.is_none());
        assert_eq!(config.topics.update, "home/garage/door/update");
        assert_eq!(config.topics.request, "home/server/garage/historyrequest");
        assert_eq!(config.database.path, "./GarageHistory.db");
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("absent.toml");

        let config = load_config_with_env(path.to_str(), no_env).expect("should use defaults");
        assert_eq!(config.broker.port, 1883);
    }

    #[test]
    fn partial_file_keeps_defaults_for_other_fields() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [broker]
            host = "broker.lan"
            username = "garage"
            password = "hunter2"

            [topics]
            update = "garage/left/update"

            [database]
            path = "/var/lib/garage/history.db"
            pool_max_size = 2
            "#,
        )
        .expect("should write config");

        let config = load_config_with_env(path.to_str(), no_env).expect("should parse");

        assert_eq!(config.broker.address(), "broker.lan:1883");
        assert_eq!(config.broker.username.as_deref(), Some("garage"));
        assert_eq!(config.topics.update, "garage/left/update");
        assert_eq!(config.topics.request, "home/server/garage/historyrequest");
        assert_eq!(config.database.runtime_settings().pool_max_size, 2);
        assert_eq!(
            config.database.runtime_settings().busy_timeout_ms,
            DbRuntimeSettings::default().busy_timeout_ms
        );
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[broker\nport = ").expect("should write config");

        let err = load_config_with_env(path.to_str(), no_env).expect_err("should fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GARAGE_BROKER_HOST", "10.0.0.2"),
            ("GARAGE_BROKER_PORT", "8883"),
            ("GARAGE_REQUEST_TOPIC", "garage/history"),
            ("GARAGE_DB_PATH", ":memory:"),
            ("GARAGE_LOG_LEVEL", "debug"),
            ("GARAGE_LOG_JSON", "1"),
        ]);

        let config = load_config_with_env(None, |key| env.get(key).map(|v| v.to_string()))
            .expect("overrides should be valid");

        assert_eq!(config.broker.address(), "10.0.0.2:8883");
        assert_eq!(config.topics.request, "garage/history");
        assert_eq!(config.database.path, ":memory:");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn unparsable_port_override_is_ignored() {
        let config = load_config_with_env(None, |key| {
            (key == "GARAGE_BROKER_PORT").then(|| "not-a-port".to_string())
        })
        .expect("should keep default port");
        assert_eq!(config.broker.port, 1883);
    }

    #[test]
    fn identical_topics_are_rejected() {
        let err = load_config_with_env(None, |key| match key {
            "GARAGE_UPDATE_TOPIC" | "GARAGE_REQUEST_TOPIC" => Some("garage".to_string()),
            _ => None,
        })
        .expect_err("topics must differ");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn wildcard_topics_are_rejected() {
        for topic in ["garage/+/update", "garage/#"] {
            let mut config = Config::default();
            config.topics.update = topic.to_string();
            assert!(config.validate().is_err(), "'{topic}' should be rejected");
        }
    }

    #[test]
    fn empty_topic_is_rejected() {
        let mut config = Config::default();
        config.topics.request = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
