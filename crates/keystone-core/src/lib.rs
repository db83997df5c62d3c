//! # Keystone Core
//!
//! Types shared by every Keystone handler:
//!
//! - [`Response`] - the uniform success/error envelope
//! - [`StructuredError`] - classified failures copied verbatim to clients
//! - [`Fingerprint`] / [`Content`] - opt-in payload hashing for `ETag`s
//! - [`Handler`] - async request handlers
//! - [`error_response`] - total mapping from failures to envelopes

#![doc(html_root_url = "https://docs.rs/keystone-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod envelope;
mod error;
mod fingerprint;
mod handler;
mod info;
pub mod mapping;

pub use envelope::{ErrorBody, Outcome, Response};
pub use error::{
    ErrorCategory, NotImplemented, StructuredError, NOT_IMPLEMENTED_CODE,
    NOT_IMPLEMENTED_MESSAGE, UNEXPECTED_ERROR_CODE, UNEXPECTED_ERROR_MESSAGE,
};
pub use fingerprint::{fingerprint_of, Content, Fingerprint, FingerprintError};
pub use handler::{
    not_implemented, BoxHandler, Handler, HandlerFuture, HandlerResult, PathParams, Request,
};
pub use info::ApiInformation;
pub use mapping::{error_response, DetailPolicy};
