//! Error types for the intelligence service.

use unified_search::SearchError;

/// Top-level error type for storage, versioning and service wiring.
#[derive(Debug, thiserror::Error)]
pub enum IntelError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Storage backend error (store unreachable, schema problem).
    #[error("storage error: {0}")]
    Storage(String),

    /// A write was attempted and rejected by a backend.
    #[error("storage write failed: {0}")]
    StorageWriteFailure(String),

    /// Requested record or version does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input.
    #[error("validation error: {0}")]
    Validation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the search core.
    #[error("search error: {0}")]
    Search(#[from] SearchError),

    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON (de)serialisation error.
    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, IntelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_stable() {
        assert_eq!(
            IntelError::NotFound("version v1".into()).to_string(),
            "not found: version v1"
        );
        assert_eq!(
            IntelError::StorageWriteFailure("graph".into()).to_string(),
            "storage write failed: graph"
        );
    }

    #[test]
    fn search_errors_convert() {
        let err: IntelError = SearchError::Validation("empty".into()).into();
        assert_eq!(err.to_string(), "search error: validation error: empty");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IntelError>();
    }
}
