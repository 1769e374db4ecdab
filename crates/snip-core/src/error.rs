use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors returned by every [`Storage`](crate::Storage) backend.
///
/// `Duplicate`, `NotFound` and `Gone` are the outcomes callers are expected to
/// branch on. The remaining variants are generic storage failures: the medium was
/// unreachable, too slow, or returned something we could not interpret.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("url {url} is already shortened as {existing_key}")]
    Duplicate { existing_key: String, url: String },
    #[error("short key not found: {0}")]
    NotFound(String),
    #[error("short key is no longer available: {0}")]
    Gone(String),
    #[error("short key already exists: {0}")]
    Conflict(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage i/o failed: {0}")]
    Io(String),
}

impl StorageError {
    /// Returns `true` for failures of the medium itself rather than a
    /// domain outcome such as a duplicate or a missing key.
    pub fn is_backend_failure(&self) -> bool {
        !matches!(
            self,
            StorageError::Duplicate { .. }
                | StorageError::NotFound(_)
                | StorageError::Gone(_)
                | StorageError::Conflict(_)
        )
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidData(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_outcomes_are_not_backend_failures() {
        let duplicate = StorageError::Duplicate {
            existing_key: "k1".to_string(),
            url: "https://example.com".to_string(),
        };
        assert!(!duplicate.is_backend_failure());
        assert!(!StorageError::NotFound("k".into()).is_backend_failure());
        assert!(!StorageError::Gone("k".into()).is_backend_failure());
        assert!(StorageError::Timeout("slow".into()).is_backend_failure());
        assert!(StorageError::Io("disk full".into()).is_backend_failure());
    }

    #[test]
    fn duplicate_message_names_existing_key() {
        let err = StorageError::Duplicate {
            existing_key: "abc".to_string(),
            url: "https://example.com".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "url https://example.com is already shortened as abc"
        );
    }
}
