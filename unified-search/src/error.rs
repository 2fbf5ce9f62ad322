//! Error types for the unified-search crate.
//!
//! Messages are stable strings suitable for display and for matching in
//! tests. Query text never appears in an error message.

/// Errors that can occur while searching local and remote backends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    /// A local or remote source could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A backend did not answer within its time budget.
    #[error("backend timed out: {0}")]
    BackendTimeout(String),

    /// The query or content is malformed. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid search configuration.
    #[error("config error: {0}")]
    Config(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl SearchError {
    /// Whether the retry executor should attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::BackendTimeout(_))
    }
}

/// Convenience type alias for unified-search results.
pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_backend_unavailable() {
        let err = SearchError::BackendUnavailable("connection refused".into());
        assert_eq!(err.to_string(), "backend unavailable: connection refused");
    }

    #[test]
    fn display_backend_timeout() {
        let err = SearchError::BackendTimeout("gov-data exceeded 10s".into());
        assert_eq!(err.to_string(), "backend timed out: gov-data exceeded 10s");
    }

    #[test]
    fn display_validation() {
        let err = SearchError::Validation("query must not be empty".into());
        assert_eq!(err.to_string(), "validation error: query must not be empty");
    }

    #[test]
    fn display_cancelled() {
        assert_eq!(SearchError::Cancelled.to_string(), "operation cancelled");
    }

    #[test]
    fn retryable_classification() {
        assert!(SearchError::BackendUnavailable("x".into()).is_retryable());
        assert!(SearchError::BackendTimeout("x".into()).is_retryable());
        assert!(!SearchError::Validation("x".into()).is_retryable());
        assert!(!SearchError::Config("x".into()).is_retryable());
        assert!(!SearchError::Cancelled.is_retryable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SearchError>();
    }
}
