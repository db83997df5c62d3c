//! Layered configuration for Keystone servers.
//!
//! [`KeystoneConfig`] is the whole document. [`ConfigLoader`] builds it from
//! defaults, a TOML or JSON file, a `.env` file and environment variables,
//! then validates it. Unknown fields are rejected.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//! socket_path = "/run/keystone/api.sock"
//! shutdown_timeout_secs = 30
//! expose_error_details = true
//! max_body_size = 1048576
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Every value can be overridden with `KEYSTONE__SECTION__KEY`:
//!
//! - `KEYSTONE__SERVER__PORT=9000`
//! - `KEYSTONE__SERVER__SOCKET_PATH=` (empty disables the socket listener)
//! - `KEYSTONE__SERVER__MAX_BODY_SIZE=65536`
//! - `KEYSTONE__LOGGING__FORMAT=pretty`

#![doc(html_root_url = "https://docs.rs/keystone-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;

pub use config::{KeystoneConfig, LoggingSection, ServerSection};
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
