//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by a fallible value producer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key was empty
    #[error("Invalid key: cache keys must not be empty")]
    EmptyKey,

    /// Sliding window outside of `(0, 365 days]`
    #[error("Invalid sliding expiration {0:?}: window must be greater than zero and at most 365 days")]
    InvalidSlidingWindow(Duration),

    /// Sweep scheduling interval that tokio cannot tick on
    #[error("Invalid sweep interval: {name} must be greater than zero, got {value:?}")]
    InvalidSweepInterval {
        /// Configuration field name
        name: &'static str,
        /// Rejected value
        value: Duration,
    },

    /// Stored value is not of the requested type
    #[error("Type mismatch for key '{key}' (namespace {namespace:?}): stored value is not a {expected}")]
    TypeMismatch {
        /// Logical key
        key: String,
        /// Namespace of the key
        namespace: Option<String>,
        /// Requested type name
        expected: &'static str,
    },

    /// Value producer failed; nothing was cached
    #[error("Value producer failed for key '{key}' (namespace {namespace:?})")]
    Producer {
        /// Logical key
        key: String,
        /// Namespace of the key
        namespace: Option<String>,
        /// Producer failure
        #[source]
        source: BoxError,
    },

    /// Background sweep was requested outside of a tokio runtime
    #[error("Background sweep requires a tokio runtime; build the cache inside one or pass a runtime handle")]
    NoRuntime,
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_producer_error_keeps_source_and_context() {
        let err = CacheError::Producer {
            key: "user:42".to_string(),
            namespace: Some("users".to_string()),
            source: "database offline".into(),
        };

        let message = err.to_string();
        assert!(message.contains("user:42"));
        assert!(message.contains("users"));
        assert_eq!(err.source().unwrap().to_string(), "database offline");
    }

    #[test]
    fn test_sliding_window_message() {
        let err = CacheError::InvalidSlidingWindow(Duration::ZERO);
        assert!(err.to_string().contains("365 days"));
    }
}
