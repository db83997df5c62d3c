//! Configuration document types.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use keystone_core::DetailPolicy;
use keystone_server::{
    DEFAULT_HOST, DEFAULT_MAX_BODY_SIZE, DEFAULT_PORT, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
use keystone_telemetry::{LogConfig, LogFormat};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Complete Keystone configuration.
///
/// # Example
///
/// ```
/// use keystone_config::KeystoneConfig;
///
/// let config = KeystoneConfig::default();
/// assert_eq!(config.server.port, 8080);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct KeystoneConfig {
    /// Listener and shutdown settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingSection,
}

/// The `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// IP address of the TCP listener.
    pub host: String,

    /// TCP port. `0` picks an ephemeral port.
    pub port: u16,

    /// Path of the local socket listener. Absent or empty disables it.
    pub socket_path: Option<PathBuf>,

    /// Grace period for in-flight requests after a termination signal.
    pub shutdown_timeout_secs: u64,

    /// Whether unclassified error details reach clients.
    pub expose_error_details: bool,

    /// Largest accepted request body in bytes. Larger bodies get a 413.
    pub max_body_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            socket_path: None,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            expose_error_details: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// The `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// Filter directive, e.g. `info` or `keystone_server=debug`.
    pub level: String,

    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl KeystoneConfig {
    /// Checks values serde cannot check on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an empty or non-IP host,
    /// a zero shutdown timeout or body limit, or an empty log level.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::invalid_value("server.host", "must not be empty"));
        }
        if self.server.host.parse::<IpAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.host",
                format!("not an IP address: {}", self.server.host),
            ));
        }
        if self.server.shutdown_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "server.shutdown_timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.server.max_body_size == 0 {
            return Err(ConfigError::invalid_value(
                "server.max_body_size",
                "must be greater than zero",
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::invalid_value("logging.level", "must not be empty"));
        }
        Ok(())
    }

    /// Builds the server runtime configuration.
    #[must_use]
    pub fn server_config(&self) -> keystone_server::ServerConfig {
        let mut builder = keystone_server::ServerConfig::builder()
            .host(self.server.host.clone())
            .port(self.server.port)
            .shutdown_timeout(Duration::from_secs(self.server.shutdown_timeout_secs))
            .detail_policy(DetailPolicy::from_flag(self.server.expose_error_details))
            .max_body_size(self.server.max_body_size);
        if let Some(path) = &self.server.socket_path {
            builder = builder.socket_path(path.clone());
        }
        builder.build()
    }

    /// Builds the logging configuration on top of the production preset.
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.logging.level.clone(),
            format: self.logging.format,
            ..LogConfig::production()
        }
    }
}
