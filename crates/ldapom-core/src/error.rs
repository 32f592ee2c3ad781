//! Error types for directory object mapping.
//!
//! Every fallible operation in the workspace returns [`Result`]. Remote failures are surfaced
//! unchanged to the caller; nothing in the core retries.

use thiserror::Error;

/// Main error type for ldapom operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The directory has no entry under the requested distinguished name
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation is not valid for the entry's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed attribute name, value or distinguished name
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The directory server rejected the call or could not be reached
    #[error("Remote failure during {operation}: {message}")]
    RemoteFailure {
        /// Directory operation that failed (`search`, `modify`, ...)
        operation: String,
        /// Error message reported by the protocol layer
        message: String,
    },

    /// A remote call exceeded its operation timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid directory endpoint
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Specialized result type for ldapom operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds a [`Error::RemoteFailure`] for the named operation.
    #[must_use]
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteFailure {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::RemoteFailure { .. } => "REMOTE_FAILURE",
            Self::Timeout(_) => "TIMEOUT",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::InvalidEndpoint(_) => "INVALID_ENDPOINT",
        }
    }

    /// Returns true if the failure originated in the directory round-trip itself.
    #[must_use]
    pub const fn is_remote_failure(&self) -> bool {
        matches!(self, Self::RemoteFailure { .. } | Self::Timeout(_))
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::RemoteFailure { .. } | Self::Timeout(_) | Self::ConfigError(_)
        )
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NotFound("x".to_string()).error_code(), "NOT_FOUND");
        assert_eq!(
            Error::InvalidState("x".to_string()).error_code(),
            "INVALID_STATE"
        );
        assert_eq!(
            Error::InvalidArgument("x".to_string()).error_code(),
            "INVALID_ARGUMENT"
        );
        assert_eq!(Error::remote("modify", "busy").error_code(), "REMOTE_FAILURE");
        assert_eq!(Error::Timeout("x".to_string()).error_code(), "TIMEOUT");
        assert_eq!(
            Error::ConfigError("x".to_string()).error_code(),
            "CONFIG_ERROR"
        );
        assert_eq!(
            Error::InvalidEndpoint("x".to_string()).error_code(),
            "INVALID_ENDPOINT"
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::remote("delete", "insufficientAccessRights");
        assert_eq!(
            err.to_string(),
            "Remote failure during delete: insufficientAccessRights"
        );

        let err = Error::NotFound("cn=alice,dc=example,dc=com".to_string());
        assert_eq!(err.to_string(), "Not found: cn=alice,dc=example,dc=com");
    }

    #[test]
    fn test_remote_classification() {
        assert!(Error::remote("search", "down").is_remote_failure());
        assert!(Error::Timeout("search".to_string()).is_remote_failure());
        assert!(!Error::NotFound("x".to_string()).is_remote_failure());
        assert!(!Error::InvalidState("x".to_string()).is_remote_failure());
    }

    #[test]
    fn test_should_log() {
        assert!(Error::remote("add", "refused").should_log());
        assert!(Error::ConfigError("test".to_string()).should_log());
        assert!(Error::Timeout("test".to_string()).should_log());

        assert!(!Error::NotFound("test".to_string()).should_log());
        assert!(!Error::InvalidArgument("test".to_string()).should_log());
    }

    #[test]
    fn test_from_url_parse_error() {
        let err = url::Url::parse("not a url").unwrap_err();
        let converted: Error = err.into();
        assert!(matches!(converted, Error::InvalidEndpoint(_)));
    }
}
