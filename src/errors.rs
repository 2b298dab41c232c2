//! Error taxonomy for the load generator.
//!
//! Configuration problems are detected synchronously at validation time and
//! reported through [`ConfigurationError`], which can aggregate every problem
//! found into a single message. Transient request failures are classified
//! into [`RequestFailure`] categories that map onto the benchmark counters.

use std::fmt;
use thiserror::Error;

/// Error raised when a load specification or component configuration is
/// invalid. Validation collects all problems before failing, so `Multiple`
/// enumerates everything wrong with a spec in one shot.
#[derive(Error, Debug, Clone)]
pub enum ConfigurationError {
    #[error("Field '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Field '{field}': value {value} is out of range (minimum {min})")]
    BelowMinimum {
        field: String,
        value: String,
        min: String,
    },

    #[error("{0} configuration problem(s): {1}")]
    Multiple(usize, String),
}

impl ConfigurationError {
    /// Builds an `InvalidValue` error for `field`.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigurationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Collapses a list of problems into a single error, or `Ok` when the
    /// list is empty.
    pub fn from_problems(problems: Vec<String>) -> Result<(), ConfigurationError> {
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::Multiple(
                problems.len(),
                problems.join("; "),
            ))
        }
    }
}

/// Categories of transient failures observed while driving requests.
///
/// Each category maps to exactly one benchmark counter, so a failed request
/// is never double counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestFailure {
    /// The connection could not be established (DNS, refused, TLS).
    ConnectionFailure,

    /// The request or response timed out.
    Timeout,

    /// The stream was interrupted after it was accepted by the pool.
    StreamReset,
}

impl RequestFailure {
    /// Classifies a reqwest error into the counter category it should be
    /// accounted under.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_connect() {
            RequestFailure::ConnectionFailure
        } else if error.is_timeout() {
            RequestFailure::Timeout
        } else {
            // Body, decode and protocol errors all surface after the pool
            // accepted the stream.
            RequestFailure::StreamReset
        }
    }

    /// The counter suffix this category is accounted under.
    pub fn counter(&self) -> &'static str {
        match self {
            RequestFailure::ConnectionFailure => "pool_connection_failure",
            RequestFailure::Timeout => "stream_resets",
            RequestFailure::StreamReset => "stream_resets",
        }
    }
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequestFailure::ConnectionFailure => "connection_failure",
            RequestFailure::Timeout => "timeout",
            RequestFailure::StreamReset => "stream_reset",
        };
        write!(f, "{}", label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_problems_empty_is_ok() {
        assert!(ConfigurationError::from_problems(vec![]).is_ok());
    }

    #[test]
    fn from_problems_joins_messages() {
        let err = ConfigurationError::from_problems(vec![
            "first problem".to_string(),
            "second problem".to_string(),
        ])
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("2 configuration problem(s)"));
        assert!(message.contains("first problem"));
        assert!(message.contains("second problem"));
    }

    #[test]
    fn invalid_value_mentions_field() {
        let err = ConfigurationError::invalid("requests_per_second", "must be >= 1");
        assert!(err.to_string().contains("requests_per_second"));
    }

    #[test]
    fn failure_counters() {
        assert_eq!(
            RequestFailure::ConnectionFailure.counter(),
            "pool_connection_failure"
        );
        assert_eq!(RequestFailure::StreamReset.counter(), "stream_resets");
    }
}
