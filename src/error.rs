//! Error types for slicesync
//!
//! This module defines the error hierarchy for the entire crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.

use thiserror::Error;

/// The main error type for slicesync
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // State Errors
    // ============================================================================
    #[error("Unsupported state shape: {message}")]
    InvalidState { message: String },

    #[error("State error: {message}")]
    State { message: String },

    #[error("Cursor error: {message}")]
    Cursor { message: String },

    #[error("No cursor is tracked for partition {partition}")]
    UnknownPartition { partition: String },

    // ============================================================================
    // Read Errors
    // ============================================================================
    #[error("Partition enumeration failed for stream '{stream}': {message}")]
    PartitionEnumeration { stream: String, message: String },

    #[error("Failed to read slice {slice} of stream '{stream}': {message}")]
    Retrieval {
        stream: String,
        slice: String,
        message: String,
        retryable: bool,
    },

    #[error("Read of stream '{stream}' was cancelled")]
    Cancelled { stream: String },

    #[error("Worker thread panicked while reading stream '{stream}'")]
    WorkerPanic { stream: String },

    #[error("Stream '{stream}' not found")]
    StreamNotFound { stream: String },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid config value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported state shape error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Create a cursor error
    pub fn cursor(message: impl Into<String>) -> Self {
        Self::Cursor {
            message: message.into(),
        }
    }

    /// Create an unknown partition error
    pub fn unknown_partition(partition: impl Into<String>) -> Self {
        Self::UnknownPartition {
            partition: partition.into(),
        }
    }

    /// Create a partition enumeration error
    pub fn partition(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PartitionEnumeration {
            stream: stream.into(),
            message: message.into(),
        }
    }

    /// Create a fatal retrieval error
    pub fn retrieval(
        stream: impl Into<String>,
        slice: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Retrieval {
            stream: stream.into(),
            slice: slice.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a retrieval error that may succeed on another attempt
    pub fn transient(
        stream: impl Into<String>,
        slice: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Retrieval {
            stream: stream.into(),
            slice: slice.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(stream: impl Into<String>) -> Self {
        Self::Cancelled {
            stream: stream.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Retrieval { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Check if this error is a configuration problem that must fail fast
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::Config { .. }
                | Error::InvalidConfigValue { .. }
                | Error::InvalidState { .. }
                | Error::YamlParse(_)
        )
    }

    /// Report an error raised while enumerating the partitions of `stream`
    pub fn in_enumeration(self, stream: &str) -> Self {
        match self {
            Error::PartitionEnumeration { .. } => self,
            other => Error::partition(stream, other.to_string()),
        }
    }

    /// Attach slice context to an error raised while reading that slice.
    ///
    /// Errors that already carry retrieval context keep it.
    pub fn in_slice(self, stream: &str, slice: &str) -> Self {
        match self {
            Error::Retrieval { .. } | Error::Cancelled { .. } => self,
            other => Error::Retrieval {
                stream: stream.to_string(),
                slice: slice.to_string(),
                message: other.to_string(),
                retryable: false,
            },
        }
    }
}

/// Result type alias for slicesync
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("test message");
        assert_eq!(err.to_string(), "Configuration error: test message");

        let err = Error::invalid_state("expected 'states'");
        assert_eq!(err.to_string(), "Unsupported state shape: expected 'states'");

        let err = Error::partition("comments", "parent read failed");
        assert_eq!(
            err.to_string(),
            "Partition enumeration failed for stream 'comments': parent read failed"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::transient("users", "{}", "timeout").is_retryable());

        assert!(!Error::retrieval("users", "{}", "bad request").is_retryable());
        assert!(!Error::config("test").is_retryable());
        assert!(!Error::cancelled("users").is_retryable());
    }

    #[test]
    fn test_is_config_error() {
        assert!(Error::invalid_state("legacy").is_config_error());
        assert!(Error::config("bad").is_config_error());
        assert!(!Error::state("bad").is_config_error());
    }

    #[test]
    fn test_in_slice_wraps_foreign_errors() {
        let err = Error::cursor("boom").in_slice("users", "{\"page\":1}");
        match err {
            Error::Retrieval {
                stream,
                slice,
                message,
                retryable,
            } => {
                assert_eq!(stream, "users");
                assert_eq!(slice, "{\"page\":1}");
                assert!(message.contains("boom"));
                assert!(!retryable);
            }
            other => panic!("Expected Retrieval error, got {other:?}"),
        }

        let err = Error::transient("users", "a", "timeout").in_slice("other", "b");
        assert!(err.is_retryable());
    }
}
