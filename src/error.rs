//! Error types for fixloop
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in fixloop
#[derive(Debug, Error)]
pub enum FixloopError {
    /// Caller supplied something unusable (bad flag value, unreadable input)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration failed validation
    #[error("Config error: {0}")]
    Config(String),

    /// Cache store unreachable or corrupt
    #[error("Cache error: {0}")]
    Cache(String),

    /// Metrics or feedback persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Terminal retry decision; the caller must escalate
    #[error("Retry exhausted for {category} after {attempts} attempt(s): {reason}")]
    RetryExhausted {
        category: String,
        attempts: u32,
        reason: String,
    },

    /// Backoff wait aborted by an external signal
    #[error("Cancelled: {reason}")]
    Cancelled { reason: String },

    /// Illegal ErrorRecord state change
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Pattern compilation error
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl FixloopError {
    /// Process exit code for this error at the CLI boundary.
    pub fn exit_code(&self) -> i32 {
        match self {
            FixloopError::InvalidInput(_) => 2,
            _ => 1,
        }
    }

    /// True for the two terminal outcomes that need caller action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FixloopError::RetryExhausted { .. } | FixloopError::Cancelled { .. })
    }
}

/// Result type alias for fixloop operations
pub type Result<T> = std::result::Result<T, FixloopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_error() {
        let err = FixloopError::InvalidInput("severity must be within 0..=1".to_string());
        assert_eq!(err.to_string(), "Invalid input: severity must be within 0..=1");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_retry_exhausted_error() {
        let err = FixloopError::RetryExhausted {
            category: "network".to_string(),
            attempts: 5,
            reason: "attempts_exhausted".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Retry exhausted for network after 5 attempt(s): attempts_exhausted"
        );
        assert_eq!(err.exit_code(), 1);
        assert!(err.is_terminal());
    }

    #[test]
    fn test_cancelled_is_terminal() {
        let err = FixloopError::Cancelled {
            reason: "job timed out".to_string(),
        };
        assert!(err.is_terminal());
        assert!(!FixloopError::Cache("locked".to_string()).is_terminal());
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = FixloopError::InvalidTransition {
            from: "resolved".to_string(),
            to: "retrying".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid state transition from resolved to retrying");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FixloopError = io_err.into();
        assert!(matches!(err, FixloopError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: FixloopError = json_err.into();
        assert!(matches!(err, FixloopError::Json(_)));
    }

    #[test]
    fn test_regex_error_conversion() {
        let regex_err = regex::Regex::new("(unclosed").unwrap_err();
        let err: FixloopError = regex_err.into();
        assert!(matches!(err, FixloopError::Regex(_)));
        assert_eq!(err.exit_code(), 1);
    }
}
