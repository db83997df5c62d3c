//! # Keystone Telemetry
//!
//! Structured logging for Keystone services, built on `tracing` and
//! `tracing-subscriber`. JSON output is the production default; a pretty
//! format is available for local development.
//!
//! ```rust,ignore
//! use keystone_telemetry::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::production())?;
//! tracing::info!(port = 8080, "Listening");
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod logging;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
