//! Layered configuration loading.
//!
//! Later layers override earlier ones:
//!
//! 1. Built-in defaults
//! 2. A configuration file (TOML or JSON), or an inline string
//! 3. Variables from a `.env` file
//! 4. `PREFIX__SECTION__KEY` environment variables

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{ConfigError, KeystoneConfig};

/// Default prefix for environment overrides.
pub const DEFAULT_ENV_PREFIX: &str = "KEYSTONE";

/// Configuration loader.
///
/// # Example
///
/// ```no_run
/// use keystone_config::ConfigLoader;
///
/// # fn main() -> Result<(), keystone_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_file("keystone.toml")?
///     .with_dotenv()?
///     .with_env_prefix("KEYSTONE")
///     .load()?;
///
/// println!("listening on {}:{}", config.server.host, config.server.port);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: KeystoneConfig,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Creates a loader holding the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the configuration with the contents of a file.
    ///
    /// The format is chosen by extension: `.toml` or `.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, in an unknown
    /// format, or contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        self.config = parse(&content, format)?;
        Ok(self)
    }

    /// Like [`with_file`](Self::with_file), but a missing file is skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Replaces the configuration with an inline document.
    ///
    /// # Errors
    ///
    /// Returns an error if `format` is not `toml` or `json`, or parsing
    /// fails.
    ///
    /// # Example
    ///
    /// ```
    /// use keystone_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[server]\nport = 3000", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.port, 3000);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = parse(content, format)?;
        Ok(self)
    }

    /// Loads `.env` from the working directory into the process environment,
    /// if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is malformed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads a specific `.env` file into the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn with_dotenv_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        dotenvy::from_path(path.as_ref())?;
        Ok(self)
    }

    /// Enables `PREFIX__SECTION__KEY` overrides, applied by [`load`](Self::load).
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns an error if an override cannot be parsed or validation fails.
    pub fn load(mut self) -> Result<KeystoneConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: Vec<(String, String)> = env::vars()
                .filter(|(k, _)| k.starts_with(&prefix))
                .collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the configuration without overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> KeystoneConfig {
        self.config
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            // Another variable that merely shares the prefix, e.g. KEYSTONE_HOME.
            return Ok(());
        };
        let parts: Vec<&str> = rest.split("__").collect();

        match parts.as_slice() {
            ["SERVER", "HOST"] => self.config.server.host = value.to_string(),
            ["SERVER", "PORT"] => {
                self.config.server.port = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected a port number"))?;
            }
            ["SERVER", "SOCKET_PATH"] => {
                self.config.server.socket_path =
                    (!value.is_empty()).then(|| PathBuf::from(value));
            }
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                self.config.server.shutdown_timeout_secs = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
            }
            ["SERVER", "EXPOSE_ERROR_DETAILS"] => {
                self.config.server.expose_error_details = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            ["SERVER", "MAX_BODY_SIZE"] => {
                self.config.server.max_body_size = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected a byte count"))?;
            }
            ["LOGGING", "LEVEL"] => self.config.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                self.config.logging.format = value
                    .parse()
                    .map_err(|e| ConfigError::env_parse_error(key, format!("{e}")))?;
            }
            _ => return Err(ConfigError::env_parse_error(key, "unknown configuration key")),
        }

        Ok(())
    }
}

fn parse(content: &str, format: &str) -> Result<KeystoneConfig, ConfigError> {
    match format.to_ascii_lowercase().as_str() {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_telemetry::LogFormat;
    use std::io::Write;

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, KeystoneConfig::default());
    }

    #[test]
    fn test_with_string_toml() {
        let toml = r#"
            [server]
            host = "127.0.0.1"
            socket_path = "/run/keystone.sock"
            shutdown_timeout_secs = 5
            max_body_size = 65536

            [logging]
            format = "pretty"
        "#;
        let config = ConfigLoader::new().with_string(toml, "toml").unwrap().load().unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.socket_path, Some(PathBuf::from("/run/keystone.sock")));
        assert_eq!(config.server.shutdown_timeout_secs, 5);
        assert_eq!(config.server.max_body_size, 65536);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_with_string_json() {
        let json = r#"{"server": {"port": 3000, "expose_error_details": false}}"#;
        let config = ConfigLoader::new().with_string(json, "json").unwrap().load().unwrap();
        assert_eq!(config.server.port, 3000);
        assert!(!config.server.expose_error_details);
        assert_eq!(config.server.max_body_size, 512);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let toml = "[server]\nhttp_addr = \"0.0.0.0:80\"";
        let err = ConfigLoader::new().with_string(toml, "toml").unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));

        let err = ConfigLoader::new()
            .with_string("[metrics]\nenabled = true", "toml")
            .unwrap_err();
        assert!(err.to_string().contains("metrics"));
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let err = ConfigLoader::new()
            .with_string("[logging]\nformat = \"xml\"", "toml")
            .unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }

    #[test]
    fn test_unsupported_format() {
        let err = ConfigLoader::new().with_string("", "yaml").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(ref f) if f == "yaml"));
    }

    #[test]
    fn test_with_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\nport = 9090").unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.server.port, 9090);
    }

    #[test]
    fn test_with_file_not_found() {
        let err = ConfigLoader::new().with_file("/nonexistent/keystone.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_with_optional_file_missing() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/keystone.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_with_dotenv_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "KEYSTONE_DOTENV_TEST_MARKER=loaded").unwrap();

        ConfigLoader::new().with_dotenv_file(file.path()).unwrap();
        assert_eq!(env::var("KEYSTONE_DOTENV_TEST_MARKER").unwrap(), "loaded");
    }

    #[test]
    fn test_validation_runs_on_load() {
        let err = ConfigLoader::new()
            .with_string("[server]\nshutdown_timeout_secs = 0", "toml")
            .unwrap()
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_unvalidated() {
        let config = ConfigLoader::new()
            .with_string("[server]\nhost = \"\"", "toml")
            .unwrap()
            .load_unvalidated();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_env_var_server() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("KEYSTONE__SERVER__HOST", "127.0.0.1", "KEYSTONE").unwrap();
        loader.apply_env_var("KEYSTONE__SERVER__PORT", "7000", "KEYSTONE").unwrap();
        loader
            .apply_env_var("KEYSTONE__SERVER__SOCKET_PATH", "/tmp/k.sock", "KEYSTONE")
            .unwrap();
        loader
            .apply_env_var("KEYSTONE__SERVER__EXPOSE_ERROR_DETAILS", "off", "KEYSTONE")
            .unwrap();
        loader
            .apply_env_var("KEYSTONE__SERVER__MAX_BODY_SIZE", "512", "KEYSTONE")
            .unwrap();

        let config = loader.load_unvalidated();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.socket_path, Some(PathBuf::from("/tmp/k.sock")));
        assert!(!config.server.expose_error_details);
    }

    #[test]
    fn test_apply_env_var_empty_socket_path() {
        let mut loader = ConfigLoader::new()
            .with_string("[server]\nsocket_path = \"/run/k.sock\"", "toml")
            .unwrap();
        loader.apply_env_var("KEYSTONE__SERVER__SOCKET_PATH", "", "KEYSTONE").unwrap();
        assert!(loader.load_unvalidated().server.socket_path.is_none());
    }

    #[test]
    fn test_apply_env_var_logging() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("KEYSTONE__LOGGING__LEVEL", "warn", "KEYSTONE").unwrap();
        loader.apply_env_var("KEYSTONE__LOGGING__FORMAT", "compact", "KEYSTONE").unwrap();

        let config = loader.load_unvalidated();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_apply_env_var_errors() {
        let mut loader = ConfigLoader::new();
        assert!(loader.apply_env_var("KEYSTONE__SERVER__PORT", "eighty", "KEYSTONE").is_err());
        assert!(loader.apply_env_var("KEYSTONE__LOGGING__FORMAT", "xml", "KEYSTONE").is_err());
        assert!(loader
            .apply_env_var("KEYSTONE__SERVER__MAX_BODY_SIZE", "1MB", "KEYSTONE")
            .is_err());
        assert!(loader.apply_env_var("KEYSTONE__SERVER__WORKERS", "4", "KEYSTONE").is_err());
        assert!(loader.apply_env_var("KEYSTONE_HOME", "/opt", "KEYSTONE").is_ok());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
