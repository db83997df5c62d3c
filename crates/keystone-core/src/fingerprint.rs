//! Content fingerprinting for cache validation.
//!
//! A fingerprint is the SHA-1 of a payload's canonical JSON form, rendered
//! as 40 lowercase hex characters. Canonical means the payload is first
//! converted into a [`serde_json::Value`], whose object keys are sorted, so
//! two equal values always hash the same no matter how their maps iterate.
//!
//! Only payloads whose type implements [`Fingerprint`] are hashed. Handlers
//! choose by wrapping their payload in [`Content::fingerprinted`] or
//! [`Content::plain`].
//!
//! # Example
//!
//! ```
//! use keystone_core::{Content, Fingerprint};
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Profile {
//!     name: String,
//! }
//!
//! impl Fingerprint for Profile {}
//!
//! let content = Content::fingerprinted(Profile { name: "ada".into() });
//! let tag = content.fingerprint().unwrap().unwrap();
//! assert_eq!(tag.len(), 40);
//!
//! let plain = Content::plain(Profile { name: "ada".into() });
//! assert!(plain.fingerprint().is_none());
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Errors raised while fingerprinting a payload.
#[derive(Error, Debug)]
pub enum FingerprintError {
    /// The payload could not be converted to its canonical form.
    #[error("cannot canonicalize payload: {0}")]
    Canonicalize(#[source] serde_json::Error),
}

/// Capability for payloads that support cache validation.
///
/// The default method hashes the canonical JSON form. Types with a cheaper
/// or more meaningful version key (a revision counter, for example) can
/// override it.
pub trait Fingerprint: Serialize {
    /// Returns the fingerprint of this value.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError`] if the value cannot be canonicalized.
    fn fingerprint(&self) -> Result<String, FingerprintError> {
        fingerprint_of(self)
    }
}

/// Hashes any serializable value into a hex fingerprint.
///
/// # Errors
///
/// Returns [`FingerprintError::Canonicalize`] if the value cannot be
/// represented as JSON, for example a map with non-string keys.
pub fn fingerprint_of<T: Serialize + ?Sized>(value: &T) -> Result<String, FingerprintError> {
    let canonical = serde_json::to_value(value).map_err(FingerprintError::Canonicalize)?;
    let bytes = serde_json::to_vec(&canonical).map_err(FingerprintError::Canonicalize)?;
    Ok(format!("{:x}", Sha1::digest(&bytes)))
}

trait ErasedContent: Send + Sync {
    fn to_value(&self) -> serde_json::Result<Value>;
    fn fingerprint(&self) -> Option<Result<String, FingerprintError>>;
}

struct Plain<T>(T);

impl<T: Serialize + Send + Sync> ErasedContent for Plain<T> {
    fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(&self.0)
    }

    fn fingerprint(&self) -> Option<Result<String, FingerprintError>> {
        None
    }
}

struct Fingerprinted<T>(T);

impl<T: Fingerprint + Send + Sync> ErasedContent for Fingerprinted<T> {
    fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(&self.0)
    }

    fn fingerprint(&self) -> Option<Result<String, FingerprintError>> {
        Some(self.0.fingerprint())
    }
}

/// A type-erased success payload.
///
/// Remembers whether the wrapped value has the [`Fingerprint`] capability so
/// the dispatcher can check for it without knowing the concrete type.
#[derive(Clone)]
pub struct Content {
    inner: Arc<dyn ErasedContent>,
}

impl Content {
    /// Wraps a payload that does not take part in cache validation.
    pub fn plain<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Plain(value)),
        }
    }

    /// Wraps a payload whose fingerprint becomes the response `ETag`.
    pub fn fingerprinted<T>(value: T) -> Self
    where
        T: Fingerprint + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Fingerprinted(value)),
        }
    }

    /// Returns `None` when the payload lacks the capability, otherwise the
    /// outcome of fingerprinting it.
    pub fn fingerprint(&self) -> Option<Result<String, FingerprintError>> {
        self.inner.fingerprint()
    }

    /// Converts the payload into a JSON value.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the payload has no JSON form.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        self.inner.to_value()
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.to_value() {
            Ok(value) => f.debug_tuple("Content").field(&value).finish(),
            Err(_) => f.write_str("Content(<unserializable>)"),
        }
    }
}

impl Serialize for Content {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = self
            .inner
            .to_value()
            .map_err(serde::ser::Error::custom)?;
        value.serialize(serializer)
    }
}

impl Fingerprint for Value {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct Item {
        id: u32,
        name: String,
    }

    impl Fingerprint for Item {}

    #[derive(Serialize)]
    struct Versioned {
        revision: u64,
        body: String,
    }

    impl Fingerprint for Versioned {
        fn fingerprint(&self) -> Result<String, FingerprintError> {
            Ok(format!("rev-{}", self.revision))
        }
    }

    #[test]
    fn test_fingerprint_is_hex_of_fixed_length() {
        let tag = fingerprint_of(&Item { id: 1, name: "a".into() }).unwrap();
        assert_eq!(tag.len(), 40);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_fingerprint_known_value() {
        // sha1 of `{"x":1}`
        let tag = fingerprint_of(&serde_json::json!({"x": 1})).unwrap();
        assert_eq!(tag, "8724fc2165f042facbd9194627e4748bb7571b27");
    }

    #[test]
    fn test_fingerprint_ignores_map_order() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for i in 0..32 {
            first.insert(format!("k{i}"), i);
        }
        for i in (0..32).rev() {
            second.insert(format!("k{i}"), i);
        }
        assert_eq!(fingerprint_of(&first).unwrap(), fingerprint_of(&second).unwrap());
    }

    #[test]
    fn test_fingerprint_fails_on_non_string_keys() {
        let mut map = HashMap::new();
        map.insert((1, 2), "pair");
        let err = fingerprint_of(&map).unwrap_err();
        assert!(matches!(err, FingerprintError::Canonicalize(_)));
    }

    #[test]
    fn test_plain_content_has_no_fingerprint() {
        let content = Content::plain(Item { id: 1, name: "a".into() });
        assert!(content.fingerprint().is_none());
    }

    #[test]
    fn test_fingerprinted_content() {
        let content = Content::fingerprinted(Item { id: 1, name: "a".into() });
        let tag = content.fingerprint().unwrap().unwrap();
        assert_eq!(tag, fingerprint_of(&Item { id: 1, name: "a".into() }).unwrap());
    }

    #[test]
    fn test_custom_fingerprint_override() {
        let content = Content::fingerprinted(Versioned {
            revision: 9,
            body: "x".into(),
        });
        assert_eq!(content.fingerprint().unwrap().unwrap(), "rev-9");
    }

    #[test]
    fn test_content_serializes_as_payload() {
        let content = Content::plain(Item { id: 3, name: "c".into() });
        let json = serde_json::to_string(&content).unwrap();
        assert_eq!(json, r#"{"id":3,"name":"c"}"#);
    }

    #[test]
    fn test_unserializable_content_fails_to_serialize() {
        let mut map = HashMap::new();
        map.insert((1, 2), "pair");
        let content = Content::plain(map);
        assert!(serde_json::to_string(&content).is_err());
        assert_eq!(format!("{content:?}"), "Content(<unserializable>)");
    }

    proptest! {
        #[test]
        fn prop_fingerprint_deterministic(id in any::<u32>(), name in ".*") {
            let a = fingerprint_of(&Item { id, name: name.clone() }).unwrap();
            let b = fingerprint_of(&Item { id, name }).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_fingerprint_detects_changes(id in any::<u32>(), other in any::<u32>(), name in "[a-z]{0,16}") {
            prop_assume!(id != other);
            let a = fingerprint_of(&Item { id, name: name.clone() }).unwrap();
            let b = fingerprint_of(&Item { id: other, name }).unwrap();
            prop_assert_ne!(a, b);
        }
    }
}
