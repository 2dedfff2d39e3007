//! Configuration Module
//!
//! TOML configuration for the `mqlink` command line bridge:
//! - Logging level
//! - Broker endpoint (host, port, keepalive, bind address)
//! - Bridge behaviour (initial subscriptions, verbose mode, engine queue)
//! - Environment variable overrides (MQLINK__* prefix)

use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::engine::rumqtt::DEFAULT_CAPACITY;
use crate::protocol::{Command, MIN_KEEPALIVE};
use crate::topic::validate_topic_filter;

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(format!("bad substitution pattern: {}", e)))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}


/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Broker to connect to
    pub broker: BrokerConfig,
    /// Bridge behaviour
    pub bridge: BridgeConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Broker endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Keepalive in seconds; values below the floor are raised on CONNECT
    pub keepalive: u16,
    /// Local address to bind; defaults to the host
    pub bind_address: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keepalive() -> u16 {
    10
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keepalive: default_keepalive(),
            bind_address: None,
        }
    }
}

impl BrokerConfig {
    /// The CONNECT command carrying these settings
    pub fn connect_command(&self) -> Command {
        Command::Connect {
            host: self.host.clone(),
            port: i64::from(self.port),
            keepalive: i64::from(self.keepalive),
            bind_address: self.bind_address.clone(),
        }
    }
}

/// Bridge behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Topic filters subscribed before START
    pub subscriptions: Vec<String>,
    /// Send VERBOSE before START
    pub verbose: bool,
    /// Engine request queue capacity
    pub engine_capacity: usize,
    /// Client identifier prefix; a random suffix is appended
    pub client_id_prefix: String,
}

fn default_client_id_prefix() -> String {
    "mqlink".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            subscriptions: Vec::new(),
            verbose: false,
            engine_capacity: DEFAULT_CAPACITY,
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Environment variables in the file are substituted first, then
    /// `MQLINK__SECTION__KEY` variables override individual values.
    /// A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", default_log_level())?
            .set_default("broker.host", default_host())?
            .set_default("broker.port", default_port())?
            .set_default("broker.keepalive", default_keepalive())?
            .set_default("bridge.verbose", false)?
            .set_default("bridge.engine_capacity", DEFAULT_CAPACITY as u64)?
            .set_default("bridge.client_id_prefix", default_client_id_prefix())?;

        let path = path.as_ref();
        if !path.as_os_str().is_empty() {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    let substituted = substitute_env_vars(&content)?;
                    builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ConfigError::Io(e)),
            }
        }

        // MQLINK__BROKER__HOST etc.
        let cfg = builder
            .add_source(
                Environment::with_prefix("MQLINK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "unknown log level '{}'",
                self.log.level
            )));
        }

        if self.broker.host.is_empty() {
            return Err(ConfigError::Validation("broker.host is empty".to_string()));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::Validation(
                "broker.port must be between 1 and 65535".to_string(),
            ));
        }
        if self.broker.keepalive < MIN_KEEPALIVE {
            return Err(ConfigError::Validation(format!(
                "broker.keepalive must be at least {} seconds",
                MIN_KEEPALIVE
            )));
        }

        for filter in &self.bridge.subscriptions {
            validate_topic_filter(filter).map_err(|e| {
                ConfigError::Validation(format!("invalid subscription '{}': {}", filter, e))
            })?;
        }
        if self.bridge.engine_capacity == 0 {
            return Err(ConfigError::Validation(
                "bridge.engine_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
