//! Per-request service: body collection, routing and dispatch.

use bytes::Bytes;
use http::header::{HeaderValue, ALLOW};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use keystone_core::{Response, StructuredError};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::DEFAULT_MAX_BODY_SIZE;
use crate::dispatch::{render, Dispatcher, HttpResponse};
use crate::router::{RouteLookup, Router};

/// Error code for requests whose body cannot be read.
pub const INVALID_BODY_CODE: &str = "INVALID_BODY";

/// Error code for requests whose body exceeds the configured limit.
pub const PAYLOAD_TOO_LARGE_CODE: &str = "PAYLOAD_TOO_LARGE";

/// Routes requests and dispatches them to handlers.
#[derive(Debug)]
pub struct RequestService {
    router: Router,
    dispatcher: Dispatcher,
    max_body_size: usize,
}

impl RequestService {
    /// Creates a service over `router` with the default body limit.
    #[must_use]
    pub fn new(router: Router, dispatcher: Dispatcher) -> Self {
        Self {
            router,
            dispatcher,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Sets the largest request body, in bytes, that is read.
    #[must_use]
    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Returns the routing table.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Handles one request from the wire.
    ///
    /// Bodies longer than the limit are answered with a 413
    /// `PAYLOAD_TOO_LARGE` envelope without reaching the router.
    pub async fn handle<B>(&self, request: http::Request<B>) -> HttpResponse
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let span = tracing::info_span!(
            "request",
            request_id = %Uuid::now_v7(),
            method = %request.method(),
            path = %request.uri().path(),
        );

        async move {
            let (parts, body) = request.into_parts();
            let body = match Limited::new(body, self.max_body_size).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                    tracing::warn!(limit = self.max_body_size, "Request body too large");
                    return render(&Response::error(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        PAYLOAD_TOO_LARGE_CODE,
                        "request body is too large",
                        format!("limit is {} bytes", self.max_body_size),
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read request body");
                    return render(&Response::error(
                        StatusCode::BAD_REQUEST,
                        INVALID_BODY_CODE,
                        "cannot read the request body",
                        e.to_string(),
                    ));
                }
            };

            let response = self.route(http::Request::from_parts(parts, body)).await;
            tracing::debug!(status = response.status().as_u16(), "Request completed");
            response
        }
        .instrument(span)
        .await
    }

    /// Routes a request whose body is already collected.
    pub async fn route(&self, mut request: keystone_core::Request) -> HttpResponse {
        let path = request.uri().path().to_owned();

        match self.router.lookup(request.method(), &path) {
            RouteLookup::Matched { handler, params } => {
                request.extensions_mut().insert(params);
                self.dispatcher.dispatch(handler.as_ref(), request).await
            }
            RouteLookup::MethodNotAllowed { allowed } => method_not_allowed(&allowed),
            RouteLookup::NotFound => render(&Response::from(
                StructuredError::not_found("no route matches the request path").with_details(path),
            )),
        }
    }
}

fn method_not_allowed(allowed: &[Method]) -> HttpResponse {
    let allow = allowed
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    let mut response = render(&Response::from(
        StructuredError::from_category(
            keystone_core::ErrorCategory::MethodNotAllowed,
            "method not allowed for this path",
        )
        .with_details(format!("allowed: {allow}")),
    ));
    if let Ok(value) = HeaderValue::from_str(&allow) {
        response.headers_mut().insert(ALLOW, value);
    }
    response
}
