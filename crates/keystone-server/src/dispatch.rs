//! Uniform request dispatch.
//!
//! The [`Dispatcher`] is the only place handler outcomes become HTTP
//! responses. For every request it:
//!
//! 1. invokes the handler, catching failures and panics,
//! 2. maps any failure to an error envelope ([`error_response`]),
//! 3. serializes the envelope exactly once,
//! 4. fingerprints fingerprintable content into an `ETag`,
//! 5. builds the reply with `Content-Type` first, then `ETag`, then the
//!    status, then the body.
//!
//! Nothing reaches the wire until the `http::Response` is complete, so
//! header writes always precede the status line and body.
//!
//! # Example
//!
//! ```rust
//! use keystone_core::{HandlerResult, Request, Response};
//! use keystone_server::dispatch;
//!
//! async fn hello(_req: Request) -> HandlerResult {
//!     Ok(Response::ok(serde_json::json!({"x": 1})))
//! }
//!
//! # tokio_test::block_on(async {
//! let endpoint = dispatch(hello);
//! let reply = endpoint.serve(http::Request::new(bytes::Bytes::new())).await;
//! assert_eq!(reply.status(), 200);
//! assert!(reply.headers().contains_key(http::header::ETAG));
//! # });
//! ```

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use http::header::{HeaderValue, CONTENT_TYPE, ETAG};
use http::StatusCode;
use http_body_util::Full;
use keystone_core::{error_response, BoxHandler, DetailPolicy, Handler, Request, Response};

/// Media type of every reply.
pub const JSON_MEDIA_TYPE: &str = "application/json";

/// Error code used when an envelope cannot be serialized.
pub const SERIALIZATION_ERROR_CODE: &str = "SERIALIZATION_ERROR";

/// HTTP response type produced by dispatch.
pub type HttpResponse = http::Response<Full<Bytes>>;

/// Runs handlers and renders their envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher {
    details: DetailPolicy,
}

impl Dispatcher {
    /// Creates a dispatcher with the given detail policy.
    #[must_use]
    pub const fn new(details: DetailPolicy) -> Self {
        Self { details }
    }

    /// Returns the detail policy applied to unclassified failures.
    #[must_use]
    pub const fn detail_policy(&self) -> DetailPolicy {
        self.details
    }

    /// Invokes `handler` and renders its outcome. Never fails.
    pub async fn dispatch(&self, handler: &dyn Handler, request: Request) -> HttpResponse {
        let envelope = self.invoke(handler, request).await;
        render(&envelope)
    }

    async fn invoke(&self, handler: &dyn Handler, request: Request) -> Response {
        let call = async move { handler.call(request).await };

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(err)) => {
                let envelope = error_response(&err, self.details);
                if envelope.status().is_server_error() {
                    let chain = format!("{err:#}");
                    tracing::error!(status = %envelope.status(), error = %chain, "Handler failed");
                } else {
                    tracing::debug!(status = %envelope.status(), error = %err, "Handler rejected request");
                }
                envelope
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(panic = %message, "Handler panicked");
                error_response(
                    &anyhow::anyhow!("handler panicked: {message}"),
                    self.details,
                )
            }
        }
    }
}

/// A handler bound to a dispatcher.
#[derive(Clone)]
pub struct Endpoint {
    handler: BoxHandler,
    dispatcher: Dispatcher,
}

impl Endpoint {
    /// Overrides the detail policy.
    #[must_use]
    pub fn with_detail_policy(mut self, policy: DetailPolicy) -> Self {
        self.dispatcher = Dispatcher::new(policy);
        self
    }

    /// Serves one request.
    pub async fn serve(&self, request: Request) -> HttpResponse {
        self.dispatcher.dispatch(self.handler.as_ref(), request).await
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Wraps `handler` so every request through it goes through the uniform
/// dispatch pipeline.
pub fn dispatch(handler: impl Handler) -> Endpoint {
    Endpoint {
        handler: Arc::new(handler),
        dispatcher: Dispatcher::default(),
    }
}

/// Renders an envelope as an HTTP reply.
///
/// If the envelope cannot be serialized it is replaced by a 500
/// `SERIALIZATION_ERROR` envelope and no `ETag` is sent.
pub fn render(envelope: &Response) -> HttpResponse {
    let (status, body, etag) = match serde_json::to_vec(envelope) {
        Ok(body) => (envelope.status(), body, etag_for(envelope)),
        Err(err) => {
            tracing::error!(error = %err, "Cannot encode the response");
            let fallback = Response::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                SERIALIZATION_ERROR_CODE,
                "cannot encode the response",
                err.to_string(),
            );
            let body = serde_json::to_vec(&fallback)
                .unwrap_or_else(|_| br#"{"status_code":500}"#.to_vec());
            (StatusCode::INTERNAL_SERVER_ERROR, body, None)
        }
    };

    let mut builder =
        http::Response::builder().header(CONTENT_TYPE, HeaderValue::from_static(JSON_MEDIA_TYPE));
    if let Some(etag) = etag {
        builder = builder.header(ETAG, etag);
    }

    builder
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Cannot build the response");
            let mut response = http::Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
}

fn etag_for(envelope: &Response) -> Option<HeaderValue> {
    match envelope.content()?.fingerprint()? {
        Ok(fingerprint) => match HeaderValue::from_str(&format!("\"{fingerprint}\"")) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(error = %err, "Cannot generate the ETag");
                None
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "Cannot generate the ETag");
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
