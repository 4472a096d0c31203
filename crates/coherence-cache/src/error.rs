//! Cache error types.

use coherence_db::DbError;
use thiserror::Error;

/// A publish key or one of its components is malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// A component is empty.
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    /// A component is longer than the allowed maximum.
    #[error("{field} exceeds {max} bytes")]
    TooLong { field: &'static str, max: usize },

    /// A component contains a character outside `[A-Za-z0-9_.-]`.
    #[error("{field} contains invalid character {ch:?}")]
    InvalidChar { field: &'static str, ch: char },

    /// A component uses the reserved absent-dimension marker.
    #[error("{field} must not be the reserved value \"-\"")]
    Reserved { field: &'static str },

    /// Schema versions start at 1.
    #[error("schema version must be at least 1")]
    ZeroSchemaVersion,
}

/// Failure talking to the lease table.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("lease storage failed: {0}")]
    Storage(#[from] DbError),
}

/// Errors that can occur when reading or building published content.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The key was rejected before touching the store.
    #[error("invalid publish key: {0}")]
    Validation(#[from] KeyError),

    /// The build lock could not be taken within the wait bound.
    #[error("timed out waiting for build lock {lock}")]
    LockTimeout { lock: String },

    /// The build lock timed out and no row exists to fall back on.
    #[error("content {key_code} is being built elsewhere and no published row exists")]
    BuildUnavailable { key_code: String },

    /// The content builder failed. `detail` is for logs only.
    #[error("content build failed for {key_code}")]
    BuildFailure { key_code: String, detail: String },

    /// A stored row could not be decoded into the payload type.
    #[error("published row {row_key} could not be decoded: {reason}")]
    Decode { row_key: String, reason: String },

    /// The datastore could not be reached.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<DbError> for CacheError {
    fn from(e: DbError) -> Self {
        CacheError::Storage(e.to_string())
    }
}

impl From<LockError> for CacheError {
    fn from(e: LockError) -> Self {
        CacheError::Storage(e.to_string())
    }
}

impl CacheError {
    /// Message that may be shown outside the process. Never carries internal
    /// detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid content request",
            Self::LockTimeout { .. } | Self::BuildUnavailable { .. } => {
                "content is being prepared, retry shortly"
            }
            Self::BuildFailure { .. } | Self::Decode { .. } => "content could not be prepared",
            Self::Storage(_) => "storage unavailable, retry shortly",
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::BuildUnavailable { .. } | Self::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_failure_hides_detail() {
        let err = CacheError::BuildFailure {
            key_code: "scenario:m1:-:-:-:-".into(),
            detail: "SELECT failed: no such column secret_col".into(),
        };
        assert!(!err.to_string().contains("secret_col"));
        assert!(!err.public_message().contains("secret_col"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CacheError::BuildUnavailable { key_code: "k".into() }.is_retryable());
        assert!(CacheError::Storage("down".into()).is_retryable());
        assert!(!CacheError::Validation(KeyError::ZeroSchemaVersion).is_retryable());
    }

    #[test]
    fn test_db_error_maps_to_storage() {
        let err: CacheError = DbError::QueryError("disk I/O error".into()).into();
        assert!(matches!(err, CacheError::Storage(_)));
    }
}
