//! # Keystone
//!
//! **HTTP server runtime with uniform response envelopes**
//!
//! Keystone runs async handlers behind a fixed reply contract:
//!
//! - Every reply is a JSON envelope carrying either `content` or an
//!   `error_code`/`error_message`/`error_details` triple
//! - Fingerprinted content gets a strong `ETag`
//! - Classified errors reach the client verbatim; everything else becomes
//!   a 500 `UNEXPECTED_ERROR`
//! - TCP and an optional Unix socket are served together and drained on
//!   SIGHUP, SIGINT, SIGTERM or SIGQUIT within a bounded grace period
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keystone::prelude::*;
//!
//! async fn health(_req: Request) -> HandlerResult {
//!     Ok(Response::ok(serde_json::json!({"healthy": true})))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     Server::builder()
//!         .config(ServerConfig::builder().port(8080).build())
//!         .route(api_routes(keystone::VERSION))
//!         .route(Route::new("/health").action(Method::GET, health))
//!         .build()
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/keystone/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use http::Method;
use keystone_core::{ApiInformation, Request, Response};
use keystone_server::Route;

// Re-export core types
pub use keystone_core as core;

// Re-export server runtime
pub use keystone_server as server;

// Re-export logging setup
pub use keystone_telemetry as telemetry;

// Re-export configuration loading
pub use keystone_config as config;

/// Crate version, also reported by `GET /api/info`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builds the built-in `/api` route tree.
///
/// `GET /api/info` answers with an [`ApiInformation`] payload for
/// `api_version`.
pub fn api_routes(api_version: impl Into<String>) -> Route {
    let info = ApiInformation::new(api_version);
    Route::new("/api").sub_route(Route::new("/info").action(
        Method::GET,
        move |_request: Request| {
            let info = info.clone();
            async move { Ok::<_, anyhow::Error>(Response::ok(info)) }
        },
    ))
}

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use keystone::prelude::*;
/// ```
pub mod prelude {
    pub use http::{Method, StatusCode};

    pub use keystone_core::{
        error_response, not_implemented, ApiInformation, Content, DetailPolicy, ErrorCategory,
        Fingerprint, Handler, HandlerResult, NotImplemented, PathParams, Request, Response,
        StructuredError,
    };

    pub use keystone_server::{
        dispatch, Dispatcher, Lifecycle, LifecycleState, Route, Router, Server, ServerConfig,
        ServerError, ShutdownSignal,
    };

    pub use keystone_config::{ConfigLoader, KeystoneConfig};
    pub use keystone_telemetry::{init_logging, LogConfig, LogFormat};

    pub use crate::api_routes;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use keystone_server::{Dispatcher, RequestService, Router};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_api_info_route() {
        let service = RequestService::new(
            Router::from_routes([api_routes("2.1.0")]),
            Dispatcher::default(),
        );
        let request = http::Request::builder()
            .uri("/api/info")
            .body(Bytes::new())
            .unwrap();

        let response = service.route(request).await;
        assert_eq!(response.status(), http::StatusCode::OK);
        assert!(response.headers().contains_key(http::header::ETAG));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            json!({"status_code": 200, "content": {"api_version": "2.1.0"}})
        );
    }

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
