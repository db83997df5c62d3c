//! The response envelope every handler produces.
//!
//! On the wire an envelope is a JSON object with a `status_code` and either
//! a `content` payload or the `error_code`, `error_message` and
//! `error_details` triple:
//!
//! ```json
//! {"status_code":200,"content":{"x":1}}
//! {"status_code":404,"error_code":"NOT_FOUND","error_message":"missing","error_details":"id=7"}
//! ```
//!
//! [`Outcome`] makes the two shapes mutually exclusive, so an envelope can
//! never carry both a payload and an error.

use http::StatusCode;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::StructuredError;
use crate::fingerprint::{Content, Fingerprint};

/// The error half of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable summary.
    pub message: String,
    /// Free-form diagnostics.
    pub details: String,
}

/// What a response carries besides its status.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A successful result, possibly without a payload.
    Success(Option<Content>),
    /// A failed result.
    Error(ErrorBody),
}

/// A uniform success or error response.
///
/// # Example
///
/// ```
/// use keystone_core::Response;
/// use serde_json::json;
///
/// let response = Response::ok(json!({"x": 1}));
/// let body = serde_json::to_string(&response).unwrap();
/// assert_eq!(body, r#"{"status_code":200,"content":{"x":1}}"#);
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    outcome: Outcome,
}

impl Response {
    /// Creates a 200 response with a fingerprinted payload.
    pub fn ok<T>(content: T) -> Self
    where
        T: Fingerprint + Send + Sync + 'static,
    {
        Self::success(StatusCode::OK, Content::fingerprinted(content))
    }

    /// Creates a 200 response whose payload is never fingerprinted.
    pub fn ok_plain<T>(content: T) -> Self
    where
        T: serde::Serialize + Send + Sync + 'static,
    {
        Self::success(StatusCode::OK, Content::plain(content))
    }

    /// Creates a success response with an explicit status.
    #[must_use]
    pub fn success(status: StatusCode, content: Content) -> Self {
        Self {
            status,
            outcome: Outcome::Success(Some(content)),
        }
    }

    /// Creates a success response without a payload.
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            outcome: Outcome::Success(None),
        }
    }

    /// Creates an error response.
    #[must_use]
    pub fn error(
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            status,
            outcome: Outcome::Error(ErrorBody {
                code: code.into(),
                message: message.into(),
                details: details.into(),
            }),
        }
    }

    /// Returns the HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the outcome.
    #[must_use]
    pub const fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// Returns the payload of a success response.
    #[must_use]
    pub fn content(&self) -> Option<&Content> {
        match &self.outcome {
            Outcome::Success(content) => content.as_ref(),
            Outcome::Error(_) => None,
        }
    }

    /// Returns the error triple of an error response.
    #[must_use]
    pub const fn error_body(&self) -> Option<&ErrorBody> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Error(body) => Some(body),
        }
    }

    /// Returns true for error responses.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

impl From<&StructuredError> for Response {
    fn from(err: &StructuredError) -> Self {
        Self::error(
            err.status_code(),
            err.error_code(),
            err.error_message(),
            err.error_details(),
        )
    }
}

impl From<StructuredError> for Response {
    fn from(err: StructuredError) -> Self {
        Self::from(&err)
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("status_code", &self.status.as_u16())?;
        match &self.outcome {
            Outcome::Success(Some(content)) => map.serialize_entry("content", content)?,
            Outcome::Success(None) => {}
            Outcome::Error(body) => {
                map.serialize_entry("error_code", &body.code)?;
                map.serialize_entry("error_message", &body.message)?;
                map.serialize_entry("error_details", &body.details)?;
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_success_wire_shape() {
        let response = Response::ok(json!({"x": 1}));
        let body = serde_json::to_string(&response).unwrap();
        assert_eq!(body, r#"{"status_code":200,"content":{"x":1}}"#);
    }

    #[test]
    fn test_error_wire_shape() {
        let response = Response::error(StatusCode::NOT_FOUND, "NOT_FOUND", "missing", "id=7");
        let body: Value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            body,
            json!({
                "status_code": 404,
                "error_code": "NOT_FOUND",
                "error_message": "missing",
                "error_details": "id=7",
            })
        );
        assert!(body.get("content").is_none());
    }

    #[test]
    fn test_empty_success_omits_content() {
        let response = Response::empty(StatusCode::NO_CONTENT);
        let body = serde_json::to_string(&response).unwrap();
        assert_eq!(body, r#"{"status_code":204}"#);
    }

    #[test]
    fn test_custom_success_status() {
        let response = Response::success(StatusCode::CREATED, Content::plain(json!({"id": 5})));
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(!response.is_error());
        assert!(response.content().is_some());
        assert!(response.error_body().is_none());
    }

    #[test]
    fn test_from_structured_error() {
        let err = StructuredError::not_found("missing").with_details("id=7");
        let response = Response::from(&err);

        assert!(response.is_error());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.error_body().unwrap();
        assert_eq!(body.code, "NOT_FOUND");
        assert_eq!(body.message, "missing");
        assert_eq!(body.details, "id=7");
        assert!(response.content().is_none());
    }

    #[test]
    fn test_ok_plain_not_fingerprinted() {
        let response = Response::ok_plain(vec![1, 2, 3]);
        assert!(response.content().unwrap().fingerprint().is_none());
    }

    #[test]
    fn test_ok_is_fingerprinted() {
        let response = Response::ok(json!([1, 2, 3]));
        assert!(response.content().unwrap().fingerprint().is_some());
    }
}
