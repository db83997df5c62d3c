//! Error types produced by handlers.
//!
//! [`StructuredError`] is the designed failure path: a handler that knows
//! what went wrong returns one and the dispatcher copies its fields into the
//! response envelope verbatim. Anything else a handler returns is treated as
//! an unclassified failure (see [`crate::mapping`]).
//!
//! | `ErrorCategory` | Status | Code |
//! |---|---|---|
//! | `BadRequest` | 400 | `BAD_REQUEST` |
//! | `Unauthorized` | 401 | `UNAUTHORIZED` |
//! | `Forbidden` | 403 | `FORBIDDEN` |
//! | `NotFound` | 404 | `NOT_FOUND` |
//! | `MethodNotAllowed` | 405 | `METHOD_NOT_ALLOWED` |
//! | `Conflict` | 409 | `CONFLICT` |
//! | `Unprocessable` | 422 | `UNPROCESSABLE_ENTITY` |
//! | `Internal` | 500 | `INTERNAL_ERROR` |
//! | `NotImplemented` | 501 | `NOT_IMPLEMENTED` |
//! | `Unavailable` | 503 | `SERVICE_UNAVAILABLE` |

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error code used for failures that carry no classification.
pub const UNEXPECTED_ERROR_CODE: &str = "UNEXPECTED_ERROR";

/// Error message used for failures that carry no classification.
pub const UNEXPECTED_ERROR_MESSAGE: &str = "an unexpected error occurred";

/// Error code returned by handlers that are not implemented yet.
pub const NOT_IMPLEMENTED_CODE: &str = "NOT_IMPLEMENTED";

/// Error message returned by handlers that are not implemented yet.
pub const NOT_IMPLEMENTED_MESSAGE: &str = "not implemented";

/// Common error classes with a fixed status and code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or invalid input.
    BadRequest,
    /// Missing or invalid credentials.
    Unauthorized,
    /// Caller is not allowed to perform the operation.
    Forbidden,
    /// Resource does not exist.
    NotFound,
    /// Path exists but not for this method.
    MethodNotAllowed,
    /// Conflicting concurrent modification.
    Conflict,
    /// Well-formed input that fails domain rules.
    Unprocessable,
    /// Failure inside the service.
    Internal,
    /// Operation is a stub.
    NotImplemented,
    /// Dependency or service temporarily unavailable.
    Unavailable,
}

impl ErrorCategory {
    /// Returns the HTTP status code for this category.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Unprocessable => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns the machine-readable error code for this category.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::Conflict => "CONFLICT",
            Self::Unprocessable => "UNPROCESSABLE_ENTITY",
            Self::Internal => "INTERNAL_ERROR",
            Self::NotImplemented => NOT_IMPLEMENTED_CODE,
            Self::Unavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

/// A classified handler failure.
///
/// All four fields are sent to the client unchanged, so `error_details`
/// should only hold what the caller is allowed to see.
///
/// # Example
///
/// ```
/// use keystone_core::{ErrorCategory, StructuredError};
///
/// let err = StructuredError::from_category(ErrorCategory::NotFound, "missing")
///     .with_details("id=7");
///
/// assert_eq!(err.status_code().as_u16(), 404);
/// assert_eq!(err.error_code(), "NOT_FOUND");
/// assert_eq!(err.error_details(), "id=7");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{error_code}: {error_message}")]
pub struct StructuredError {
    status_code: StatusCode,
    error_code: String,
    error_message: String,
    error_details: String,
}

impl StructuredError {
    /// Creates a structured error from its parts. Details start empty.
    #[must_use]
    pub fn new(
        status_code: StatusCode,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            status_code,
            error_code: error_code.into(),
            error_message: error_message.into(),
            error_details: String::new(),
        }
    }

    /// Creates a structured error with the status and code of `category`.
    #[must_use]
    pub fn from_category(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::new(category.status_code(), category.code(), message)
    }

    /// Sets the diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.error_details = details.into();
        self
    }

    /// Creates a 400 error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::from_category(ErrorCategory::BadRequest, message)
    }

    /// Creates a 404 error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::from_category(ErrorCategory::NotFound, message)
    }

    /// Creates a 409 error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::from_category(ErrorCategory::Conflict, message)
    }

    /// Creates a 500 error with an explicit classification.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::from_category(ErrorCategory::Internal, message)
    }

    /// Creates the 501 error every unimplemented handler maps to.
    #[must_use]
    pub fn not_implemented() -> Self {
        Self::from_category(ErrorCategory::NotImplemented, NOT_IMPLEMENTED_MESSAGE)
    }

    /// Returns the HTTP status code.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.status_code
    }

    /// Returns the machine-readable error code.
    #[must_use]
    pub fn error_code(&self) -> &str {
        &self.error_code
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// Returns the diagnostic details.
    #[must_use]
    pub fn error_details(&self) -> &str {
        &self.error_details
    }
}

/// Sentinel failure returned by stub handlers.
///
/// Always maps to `501 NOT_IMPLEMENTED`, regardless of how it is wrapped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[error("not implemented")]
pub struct NotImplemented;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_status_codes() {
        assert_eq!(ErrorCategory::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCategory::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCategory::MethodNotAllowed.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            ErrorCategory::NotImplemented.status_code(),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            ErrorCategory::Unavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCategory::MethodNotAllowed).unwrap();
        assert_eq!(json, "\"method_not_allowed\"");
    }

    #[test]
    fn test_structured_error_accessors() {
        let err = StructuredError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "missing")
            .with_details("id=7");

        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert_eq!(err.error_message(), "missing");
        assert_eq!(err.error_details(), "id=7");
    }

    #[test]
    fn test_structured_error_display() {
        let err = StructuredError::conflict("version mismatch");
        assert_eq!(err.to_string(), "CONFLICT: version mismatch");
    }

    #[test]
    fn test_details_default_empty() {
        let err = StructuredError::bad_request("bad input");
        assert!(err.error_details().is_empty());
    }

    #[test]
    fn test_not_implemented_error() {
        let err = StructuredError::not_implemented();
        assert_eq!(err.status_code(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(err.error_code(), NOT_IMPLEMENTED_CODE);
        assert_eq!(err.error_message(), NOT_IMPLEMENTED_MESSAGE);
    }

    #[test]
    fn test_sentinel_display() {
        assert_eq!(NotImplemented.to_string(), "not implemented");
    }
}
