//! # Keystone Server
//!
//! HTTP runtime for Keystone handlers.
//!
//! This crate turns handlers into a running service:
//!
//! - [`Router`] - route trees matched by method and path
//! - [`Dispatcher`] - runs a handler and renders its envelope, with `ETag`s
//! - [`Server`] - binds TCP plus an optional local socket and serves both
//! - [`ShutdownSignal`] - signal-driven, grace-bounded shutdown
//! - [`Lifecycle`] - observable `Starting` to `Stopped`/`TimedOut` states
//!
//! ## Example
//!
//! ```rust,ignore
//! use keystone_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .config(ServerConfig::builder().port(8080).build())
//!         .build();
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod dispatch;
mod lifecycle;
mod listener;
mod router;
mod server;
mod service;
mod shutdown;

pub use config::{
    ServerConfig, ServerConfigBuilder, DEFAULT_HOST, DEFAULT_MAX_BODY_SIZE, DEFAULT_PORT,
    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
pub use dispatch::{
    dispatch, render, Dispatcher, Endpoint, HttpResponse, JSON_MEDIA_TYPE,
    SERIALIZATION_ERROR_CODE,
};
pub use lifecycle::{Lifecycle, LifecycleError, LifecycleState, FORCED_EXIT_CODE};
pub use router::{Route, RouteLookup, Router};
pub use server::{BoundServer, Server, ServerBuilder, ServerError};
pub use service::{RequestService, INVALID_BODY_CODE, PAYLOAD_TOO_LARGE_CODE};
pub use shutdown::{ConnectionToken, ConnectionTracker, ShutdownSignal, TerminationSignal};

/// Result alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
