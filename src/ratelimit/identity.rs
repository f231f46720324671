//! Caller identity and the backend keys derived from it.

use std::fmt;

use tonic::metadata::MetadataMap;

/// Identity shared by every caller that does not present one.
pub const ANONYMOUS: &str = "anonymous";

/// The subject a request is limited as.
///
/// Identities are opaque; they only namespace bucket and configuration keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn anonymous() -> Self {
        Self(ANONYMOUS.to_string())
    }

    /// Read the identity from request metadata.
    ///
    /// A missing, empty or non-ASCII header falls back to [`ANONYMOUS`], so all
    /// unauthenticated callers share one bucket.
    pub fn from_metadata(metadata: &MetadataMap, header: &str) -> Self {
        metadata
            .get(header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(Self::new)
            .unwrap_or_else(Self::anonymous)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of the token bucket for `identity`.
pub fn bucket_key(identity: &str) -> String {
    format!("user:{}", identity)
}

/// Key of the externally managed limit record for `identity`.
pub fn config_key(identity: &str) -> String {
    format!("config:user:{}", identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        let identity = Identity::new("user_123");
        assert_eq!(bucket_key(identity.as_str()), "user:user_123");
        assert_eq!(config_key(identity.as_str()), "config:user:user_123");
        assert_eq!(identity.to_string(), "user_123");
    }

    #[test]
    fn test_from_metadata() {
        let mut metadata = MetadataMap::new();
        metadata.insert("user-id", "alice".parse().unwrap());

        let identity = Identity::from_metadata(&metadata, "user-id");
        assert_eq!(identity.as_str(), "alice");
    }

    #[test]
    fn test_missing_header_is_anonymous() {
        let metadata = MetadataMap::new();
        assert_eq!(Identity::from_metadata(&metadata, "user-id"), Identity::anonymous());
    }

    #[test]
    fn test_blank_header_is_anonymous() {
        let mut metadata = MetadataMap::new();
        metadata.insert("user-id", "   ".parse().unwrap());
        assert_eq!(Identity::from_metadata(&metadata, "user-id").as_str(), ANONYMOUS);
    }

    #[test]
    fn test_custom_header() {
        let mut metadata = MetadataMap::new();
        metadata.insert("x-api-client", "svc-b".parse().unwrap());
        metadata.insert("user-id", "alice".parse().unwrap());

        let identity = Identity::from_metadata(&metadata, "x-api-client");
        assert_eq!(identity.as_str(), "svc-b");
    }
}
