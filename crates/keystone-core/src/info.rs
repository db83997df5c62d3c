//! Service information payload.

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// Describes the API a service exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiInformation {
    /// Version of the exposed API.
    pub api_version: String,
}

impl ApiInformation {
    /// Creates an information payload.
    #[must_use]
    pub fn new(api_version: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
        }
    }
}

impl Fingerprint for ApiInformation {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let info = ApiInformation::new("1.2.0");
        assert_eq!(
            serde_json::to_string(&info).unwrap(),
            r#"{"api_version":"1.2.0"}"#
        );
    }

    #[test]
    fn test_fingerprint_tracks_version() {
        let a = ApiInformation::new("1.0.0").fingerprint().unwrap();
        let b = ApiInformation::new("1.0.0").fingerprint().unwrap();
        let c = ApiInformation::new("1.0.1").fingerprint().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
