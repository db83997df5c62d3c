//! Handler trait for request processing.
//!
//! A [`Handler`] turns an inbound request into a [`Response`] envelope or a
//! failure. Any `async fn(Request) -> HandlerResult` is a handler:
//!
//! ```rust,ignore
//! use keystone_core::{HandlerResult, PathParams, Request, Response, StructuredError};
//!
//! async fn get_order(request: Request) -> HandlerResult {
//!     let id = PathParams::of(&request).get("id").unwrap_or_default().to_owned();
//!     let order = orders::find(&id).await?
//!         .ok_or_else(|| StructuredError::not_found("order not found").with_details(format!("id={id}")))?;
//!     Ok(Response::ok(order))
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::envelope::Response;
use crate::error::NotImplemented;

/// Inbound request with its body already collected.
pub type Request = http::Request<Bytes>;

/// What a handler returns.
pub type HandlerResult = anyhow::Result<Response>;

/// Boxed future returned by [`Handler::call`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// Shared, type-erased handler.
pub type BoxHandler = Arc<dyn Handler>;

/// A request handler.
pub trait Handler: Send + Sync + 'static {
    /// Handles one request.
    fn call(&self, request: Request) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: Request) -> HandlerFuture {
        Box::pin(self(request))
    }
}

/// Stub handler for operations that exist in the route table but have no
/// implementation yet. Always fails with [`NotImplemented`].
pub async fn not_implemented(_request: Request) -> HandlerResult {
    Err(NotImplemented.into())
}

/// Path parameters extracted by the router, stored in request extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    /// Wraps extracted parameters.
    #[must_use]
    pub fn new(params: HashMap<String, String>) -> Self {
        Self(params)
    }

    /// Returns the parameters attached to `request`, or an empty set.
    #[must_use]
    pub fn of(request: &Request) -> Self {
        request.extensions().get::<Self>().cloned().unwrap_or_default()
    }

    /// Returns a parameter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
