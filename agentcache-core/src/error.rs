//! Error types for the cognitive cache engine
//!
//! Only a lost key-value store is fatal to a request. Every other failure
//! mode is caught by the component that observes it and degrades to a cache
//! miss or an unvalidated passthrough; the variants below exist so those
//! components can report what they degraded from.

use thiserror::Error;

/// Main error type for cache engine operations
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The key-value store is unreachable. Fatal for lookup/store.
    #[error("Key-value store unavailable: {0}")]
    StoreUnavailable(String),

    /// A non-fatal collaborator (vector store, embedder, LLM) failed
    #[error("Dependency unavailable ({dependency}): {message}")]
    DependencyUnavailable {
        dependency: &'static str,
        message: String,
    },

    /// A classifier or provider returned output that could not be parsed
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A vector did not match the configured dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot file I/O
    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type alias for cache engine operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Wrap a provider-side failure
    pub fn dependency(dependency: &'static str, err: impl std::fmt::Display) -> Self {
        CacheError::DependencyUnavailable {
            dependency,
            message: err.to_string(),
        }
    }

    /// Whether the error must surface to the caller instead of degrading
    pub fn is_fatal(&self) -> bool {
        matches!(self, CacheError::StoreUnavailable(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CacheError::StoreUnavailable("connection refused".to_string());
        assert_eq!(
            error.to_string(),
            "Key-value store unavailable: connection refused"
        );

        let timeout_error = CacheError::Timeout {
            timeout_ms: 2000,
            context: "admission classifier".to_string(),
        };
        assert!(timeout_error.to_string().contains("timed out after 2000ms"));

        let dim = CacheError::DimensionMismatch {
            expected: 64,
            actual: 8,
        };
        assert!(dim.to_string().contains("expected 64, got 8"));
    }

    #[test]
    fn test_only_store_loss_is_fatal() {
        assert!(CacheError::StoreUnavailable("down".into()).is_fatal());
        assert!(!CacheError::dependency("vector_store", "down").is_fatal());
        assert!(!CacheError::MalformedResponse("not json".into()).is_fatal());
    }

    #[test]
    fn test_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{oops");
        let error: CacheError = parse.unwrap_err().into();
        assert!(matches!(error, CacheError::Serialization(_)));
    }
}
