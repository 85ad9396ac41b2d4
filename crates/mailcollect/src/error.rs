//! Mail collection error types.

use thiserror::Error;

/// Errors that can occur while collecting, normalizing or persisting mail.
#[derive(Error, Debug)]
pub enum MailError {
    /// Failed to reach or talk to the mail server.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// TLS/SSL error during connection.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server rejected the supplied credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Unexpected protocol response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Failed to parse a message or a response body.
    #[error("Failed to parse message: {0}")]
    Parse(String),

    /// OAuth2 token acquisition or refresh failed.
    #[error("OAuth2 error: {0}")]
    OAuth2(String),

    /// Operation timed out.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server kept throttling after the single permitted retry.
    #[error("Request throttled by server (retry after {retry_after}s)")]
    Throttled { retry_after: u64 },

    /// Folder not found on the server.
    #[error("Folder '{0}' not found")]
    FolderNotFound(String),

    /// Missing or invalid configuration.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Persistence requested with an unknown output format.
    #[error("Unsupported output format '{0}' (expected json, txt or eml)")]
    UnsupportedFormat(String),

    /// IO error while saving messages or token caches.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of a [`MailError`], as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport or authentication failure, fatal to the current call.
    Connection,
    /// A single message or attachment failed; collection continues.
    PerItem,
    /// Missing required settings at construction time.
    Configuration,
    /// Unknown persistence format.
    UnsupportedFormat,
}

impl MailError {
    /// Maps this error onto the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MailError::Connection(_)
            | MailError::Tls(_)
            | MailError::Authentication(_)
            | MailError::OAuth2(_)
            | MailError::Timeout(_)
            | MailError::Http(_)
            | MailError::Throttled { .. }
            | MailError::FolderNotFound(_) => ErrorKind::Connection,
            MailError::Protocol(_)
            | MailError::Parse(_)
            | MailError::Io(_)
            | MailError::Json(_) => ErrorKind::PerItem,
            MailError::Configuration(_) => ErrorKind::Configuration,
            MailError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
        }
    }

    /// Returns true when the error ends the current collection call.
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::PerItem
    }
}

impl From<async_native_tls::Error> for MailError {
    fn from(err: async_native_tls::Error) -> Self {
        MailError::Tls(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for MailError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        MailError::Timeout(err.to_string())
    }
}

/// Result type for mail operations.
pub type Result<T> = std::result::Result<T, MailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            MailError::Connection("refused".into()).kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            MailError::Authentication("bad password".into()).kind(),
            ErrorKind::Connection
        );
        assert_eq!(MailError::Parse("garbage".into()).kind(), ErrorKind::PerItem);
        assert_eq!(
            MailError::Configuration("missing host".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            MailError::UnsupportedFormat("pdf".into()).kind(),
            ErrorKind::UnsupportedFormat
        );
    }

    #[test]
    fn test_per_item_errors_are_not_fatal() {
        assert!(!MailError::Protocol("fetch failed".into()).is_fatal());
        assert!(MailError::Timeout("connect".into()).is_fatal());
    }

    #[test]
    fn test_unsupported_format_message() {
        let err = MailError::UnsupportedFormat("pdf".into());
        assert!(err.to_string().contains("'pdf'"));
    }
}
