//! Mapping from handler failures to response envelopes.
//!
//! [`error_response`] is total: every [`anyhow::Error`] becomes exactly one
//! envelope. The cause chain is searched, so a [`StructuredError`] keeps its
//! meaning even after being wrapped with `.context(..)`.

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::envelope::Response;
use crate::error::{
    NotImplemented, StructuredError, UNEXPECTED_ERROR_CODE, UNEXPECTED_ERROR_MESSAGE,
};

/// Whether unclassified failures expose their description to clients.
///
/// Structured errors are always sent verbatim; this only affects the
/// `error_details` of the 500 fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailPolicy {
    /// Put the failure's full description into `error_details`.
    #[default]
    Expose,
    /// Leave `error_details` empty.
    Redact,
}

impl DetailPolicy {
    /// Returns `Expose` when `expose` is true, `Redact` otherwise.
    #[must_use]
    pub const fn from_flag(expose: bool) -> Self {
        if expose {
            Self::Expose
        } else {
            Self::Redact
        }
    }
}

/// Converts a handler failure into an error envelope.
///
/// # Example
///
/// ```
/// use keystone_core::{error_response, DetailPolicy, UNEXPECTED_ERROR_CODE};
///
/// let err = anyhow::anyhow!("disk full");
/// let response = error_response(&err, DetailPolicy::Expose);
///
/// assert_eq!(response.status().as_u16(), 500);
/// let body = response.error_body().unwrap();
/// assert_eq!(body.code, UNEXPECTED_ERROR_CODE);
/// assert_eq!(body.details, "disk full");
/// ```
pub fn error_response(err: &anyhow::Error, policy: DetailPolicy) -> Response {
    if let Some(structured) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<StructuredError>())
    {
        return Response::from(structured);
    }

    if err.chain().any(|cause| cause.is::<NotImplemented>()) {
        return Response::from(StructuredError::not_implemented());
    }

    let details = match policy {
        DetailPolicy::Expose => format!("{err:#}"),
        DetailPolicy::Redact => String::new(),
    };

    Response::error(
        StatusCode::INTERNAL_SERVER_ERROR,
        UNEXPECTED_ERROR_CODE,
        UNEXPECTED_ERROR_MESSAGE,
        details,
    )
}
