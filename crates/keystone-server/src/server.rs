//! Server lifecycle orchestration.
//!
//! A [`Server`] binds its listeners in [`Server::bind`] (`Starting`), then
//! [`BoundServer::serve`] accepts on every listener concurrently
//! (`Serving`) until the shutdown signal fires. Shutdown stops the accept
//! loops, removes the local socket file, and gives in-flight requests a
//! fixed grace period (`ShuttingDown`). The drain either finishes in time
//! (`Stopped`) or the grace period elapses (`TimedOut`), in which case the
//! process exits with [`FORCED_EXIT_CODE`].
//!
//! # Example
//!
//! ```rust,ignore
//! use keystone_core::{ApiInformation, HandlerResult, Request, Response};
//! use keystone_server::{Route, Server, ServerConfig};
//! use http::Method;
//!
//! async fn info(_req: Request) -> HandlerResult {
//!     Ok(Response::ok(ApiInformation::new("1.0.0")))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .config(ServerConfig::builder().port(8080).socket_path("/run/api.sock").build())
//!         .route(Route::new("/info").action(Method::GET, info))
//!         .build();
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

use std::io;
use std::net::{AddrParseError, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::lifecycle::{Lifecycle, LifecycleState, FORCED_EXIT_CODE};
use crate::listener::{accept_loop, Listener};
use crate::router::{Route, Router};
use crate::service::RequestService;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Errors from starting or running a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured host is not an IP address.
    #[error("invalid bind host '{host}'")]
    InvalidAddress {
        /// The rejected host.
        host: String,
        /// Parse failure.
        #[source]
        source: AddrParseError,
    },

    /// The TCP listener could not be bound.
    #[error("failed to bind {addr}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// The local socket listener could not be bound.
    #[error("failed to bind socket {}", path.display())]
    SocketBind {
        /// Requested path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// Termination signal handlers could not be installed.
    #[error("failed to install signal handlers")]
    Signal(#[source] io::Error),

    /// The primary listener stopped accepting for a reason other than
    /// shutdown.
    #[error("listener failed")]
    Serve(#[source] io::Error),

    /// The primary listener task panicked or was cancelled.
    #[error("listener task failed")]
    Task(#[from] JoinError),

    /// In-flight requests did not finish within the grace period.
    #[error("shutdown grace period of {timeout:?} exceeded with {active} connection(s) open")]
    ShutdownTimedOut {
        /// The grace period.
        timeout: Duration,
        /// Connections still open at the deadline.
        active: usize,
    },
}

/// An HTTP server that has not been bound yet.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    router: Router,
    lifecycle: Lifecycle,
}

impl Server {
    /// Creates a server from a configuration and routing table.
    #[must_use]
    pub fn new(config: ServerConfig, router: Router) -> Self {
        Self {
            config,
            router,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Creates a server builder.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns a handle to the lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    /// Installs termination signal handlers, binds, and serves until a
    /// signal arrives.
    ///
    /// Returns `Ok(())` after a clean shutdown. If the grace period is
    /// exceeded the process exits with [`FORCED_EXIT_CODE`] and this never
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed, a listener
    /// cannot be bound, or the primary listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let shutdown = ShutdownSignal::with_os_signals().map_err(ServerError::Signal)?;
        self.bind().await?.serve(shutdown).await
    }

    /// Binds the local socket listener (if configured) and the TCP listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidAddress`], [`ServerError::SocketBind`]
    /// or [`ServerError::Bind`]. No listener is left bound on failure.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let addr = self
            .config
            .tcp_addr()
            .map_err(|source| ServerError::InvalidAddress {
                host: self.config.host().to_string(),
                source,
            })?;

        let local = match self.config.socket_path() {
            Some(path) => {
                let listener =
                    Listener::bind_local(path).map_err(|source| ServerError::SocketBind {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Some((listener, path.to_path_buf()))
            }
            None => None,
        };

        let tcp = match Listener::bind_tcp(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                if let Some((listener, path)) = local {
                    drop(listener);
                    remove_socket_file(&path);
                }
                return Err(ServerError::Bind { addr, source });
            }
        };
        let local_addr = tcp.local_addr().unwrap_or(addr);

        Ok(BoundServer {
            config: self.config,
            router: self.router,
            lifecycle: self.lifecycle,
            tcp,
            local,
            local_addr,
        })
    }
}

/// A server whose listeners are bound.
#[derive(Debug)]
pub struct BoundServer {
    config: ServerConfig,
    router: Router,
    lifecycle: Lifecycle,
    tcp: Listener,
    local: Option<(Listener, PathBuf)>,
    local_addr: SocketAddr,
}

impl BoundServer {
    /// Returns the address the TCP listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the local socket path, if that listener is bound.
    #[must_use]
    pub fn socket_path(&self) -> Option<&Path> {
        self.local.as_ref().map(|(_, path)| path.as_path())
    }

    /// Returns a handle to the lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    /// Serves until `shutdown` fires, forcing a process exit if the grace
    /// period is exceeded.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Serve`] or [`ServerError::Task`] if the
    /// primary listener fails.
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        match self.serve_with_shutdown(shutdown).await {
            Err(err @ ServerError::ShutdownTimedOut { .. }) => {
                tracing::error!(error = %err, exit_code = FORCED_EXIT_CODE, "Forcing exit");
                std::process::exit(FORCED_EXIT_CODE);
            }
            other => other,
        }
    }

    /// Serves until `shutdown` fires and reports a missed grace period as
    /// [`ServerError::ShutdownTimedOut`] instead of exiting.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ShutdownTimedOut`] if in-flight requests
    /// outlive the grace period, and [`ServerError::Serve`] or
    /// [`ServerError::Task`] if the primary listener fails.
    pub async fn serve_with_shutdown(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let Self {
            config,
            router,
            lifecycle,
            tcp,
            local,
            local_addr,
        } = self;

        let service = Arc::new(
            RequestService::new(router, Dispatcher::new(config.detail_policy()))
                .with_max_body_size(config.max_body_size()),
        );
        let tracker = ConnectionTracker::new();
        let keep_alive = config.keep_alive();

        advance(&lifecycle, LifecycleState::Serving);
        tracing::info!(
            addr = %local_addr,
            socket = ?local.as_ref().map(|(_, path)| path.display().to_string()),
            "Server listening"
        );

        let mut primary = tokio::spawn(accept_loop(
            tcp,
            Arc::clone(&service),
            keep_alive,
            shutdown.clone(),
            tracker.clone(),
        ));

        let (socket_path, secondary) = match local {
            Some((listener, path)) => {
                let task = tokio::spawn(accept_loop(
                    listener,
                    Arc::clone(&service),
                    keep_alive,
                    shutdown.clone(),
                    tracker.clone(),
                ));
                let path_for_log = path.clone();
                let task = tokio::spawn(async move {
                    match task.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::error!(
                            path = %path_for_log.display(),
                            error = %e,
                            "Cannot listen on socket"
                        ),
                        Err(e) => tracing::error!(error = %e, "Socket listener task failed"),
                    }
                });
                (Some(path), Some(task))
            }
            None => (None, None),
        };

        let early_exit = tokio::select! {
            () = shutdown.recv() => None,
            joined = &mut primary => Some(joined),
        };
        let primary_done = early_exit.is_some();
        let failure = match early_exit {
            None | Some(Ok(Ok(()))) => None,
            Some(Ok(Err(e))) => Some(ServerError::Serve(e)),
            Some(Err(e)) => Some(ServerError::Task(e)),
        };
        if failure.is_some() {
            shutdown.trigger();
        }

        advance(&lifecycle, LifecycleState::ShuttingDown);
        if let Some(path) = &socket_path {
            remove_socket_file(path);
        }

        let grace = config.shutdown_timeout();
        tracing::info!(
            grace_period = ?grace,
            active_connections = tracker.active_count(),
            "Waiting for in-flight requests"
        );

        let drain = async {
            if !primary_done {
                if let Ok(Err(e)) = primary.await {
                    tracing::warn!(error = %e, "Listener failed while shutting down");
                }
            }
            if let Some(task) = secondary {
                let _ = task.await;
            }
            tracker.wait_for_drain().await;
        };

        if tokio::time::timeout(grace, drain).await.is_err() {
            advance(&lifecycle, LifecycleState::TimedOut);
            let active = tracker.active_count();
            tracing::error!(grace_period = ?grace, active_connections = active, "Shutdown deadline exceeded");
            return Err(ServerError::ShutdownTimedOut {
                timeout: grace,
                active,
            });
        }

        advance(&lifecycle, LifecycleState::Stopped);
        tracing::info!("Server stopped");
        failure.map_or(Ok(()), Err)
    }
}

fn advance(lifecycle: &Lifecycle, next: LifecycleState) {
    if let Err(e) = lifecycle.advance(next) {
        tracing::warn!(error = %e, "Ignoring lifecycle transition");
    }
}

fn remove_socket_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed socket file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Cannot remove socket file"),
    }
}

/// Builder for [`Server`].
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    routes: Vec<Route>,
}

impl ServerBuilder {
    /// Creates a builder with the default configuration and no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a route tree.
    #[must_use]
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Adds several route trees.
    #[must_use]
    pub fn routes(mut self, routes: impl IntoIterator<Item = Route>) -> Self {
        self.routes.extend(routes);
        self
    }

    /// Builds the server.
    #[must_use]
    pub fn build(self) -> Server {
        Server::new(self.config, Router::from_routes(self.routes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig::builder()
            .host("127.0.0.1")
            .port(0)
            .shutdown_timeout(Duration::from_millis(200))
            .build()
    }

    #[test]
    fn test_builder_collects_routes() {
        let server = Server::builder()
            .config(local_config())
            .route(Route::new("/a").action(http::Method::GET, keystone_core::not_implemented))
            .routes([Route::new("/b").action(http::Method::GET, keystone_core::not_implemented)])
            .build();
        assert_eq!(server.router.route_count(), 2);
        assert_eq!(server.config().port(), 0);
        assert_eq!(server.lifecycle().current(), LifecycleState::Starting);
    }

    #[tokio::test]
    async fn test_bind_invalid_host() {
        let server = Server::new(
            ServerConfig::builder().host("localhost:x").build(),
            Router::new(),
        );
        let err = server.bind().await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidAddress { .. }));
        assert_eq!(err.to_string(), "invalid bind host 'localhost:x'");
    }

    #[tokio::test]
    async fn test_bind_reports_address() {
        let bound = Server::new(local_config(), Router::new()).bind().await.unwrap();
        assert!(bound.local_addr().ip().is_loopback());
        assert_ne!(bound.local_addr().port(), 0);
        assert!(bound.socket_path().is_none());
        assert_eq!(bound.lifecycle().current(), LifecycleState::Starting);
    }

    #[tokio::test]
    async fn test_shutdown_before_serving_stops_cleanly() {
        let bound = Server::new(local_config(), Router::new()).bind().await.unwrap();
        let lifecycle = bound.lifecycle();

        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            bound.serve_with_shutdown(shutdown),
        )
        .await
        .unwrap();

        assert!(result.is_ok());
        assert_eq!(lifecycle.current(), LifecycleState::Stopped);
    }

    #[test]
    fn test_error_display() {
        let err = ServerError::ShutdownTimedOut {
            timeout: Duration::from_secs(30),
            active: 2,
        };
        assert_eq!(
            err.to_string(),
            "shutdown grace period of 30s exceeded with 2 connection(s) open"
        );

        let err = ServerError::SocketBind {
            path: PathBuf::from("/run/api.sock"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(err.to_string(), "failed to bind socket /run/api.sock");
    }

    #[test]
    fn test_error_chain_names_cause_once() {
        let cause = io::Error::other("accept exploded");
        let err = anyhow::Error::from(ServerError::Serve(cause));
        let chain = format!("{err:#}");
        assert_eq!(chain, "listener failed: accept exploded");
        assert_eq!(chain.matches("accept exploded").count(), 1);
    }

    fn bound_with(tcp: Listener, local: Option<(Listener, PathBuf)>, router: Router) -> BoundServer {
        BoundServer {
            config: local_config(),
            router,
            lifecycle: Lifecycle::new(),
            tcp,
            local,
            local_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }

    #[tokio::test]
    async fn test_primary_listener_failure_stops_server() {
        let bound = bound_with(
            Listener::Failing(io::ErrorKind::PermissionDenied),
            None,
            Router::new(),
        );
        let lifecycle = bound.lifecycle();
        let shutdown = ShutdownSignal::new();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            bound.serve_with_shutdown(shutdown.clone()),
        )
        .await
        .unwrap();

        match result {
            Err(ServerError::Serve(e)) => assert_eq!(e.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("expected a listener failure, got {other:?}"),
        }
        assert!(shutdown.is_shutdown());
        assert_eq!(lifecycle.current(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_socket_listener_failure_keeps_tcp_serving() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = tempfile::tempdir().unwrap();
        let router = Router::from_routes([Route::new("/ping").action(
            http::Method::GET,
            |_request: keystone_core::Request| async {
                Ok::<_, anyhow::Error>(keystone_core::Response::ok(serde_json::json!("pong")))
            },
        )]);
        let tcp = Listener::bind_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let bound = bound_with(
            tcp,
            Some((
                Listener::Failing(io::ErrorKind::PermissionDenied),
                dir.path().join("api.sock"),
            )),
            router,
        );
        let lifecycle = bound.lifecycle();
        let shutdown = ShutdownSignal::new();
        let server = tokio::spawn(bound.serve_with_shutdown(shutdown.clone()));

        // Let the socket accept loop hit its error first.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(lifecycle.current(), LifecycleState::Serving);
        assert!(!shutdown.is_shutdown());

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut reply = String::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.starts_with("HTTP/1.1 200"), "unexpected reply: {reply}");
        assert!(reply.contains("pong"));

        shutdown.trigger();
        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(lifecycle.current(), LifecycleState::Stopped);
    }
}
