//! Form error types.

use coherence_db::DbError;
use http::StatusCode;
use thiserror::Error;

/// Errors from form reads and writes.
///
/// A version conflict is not an error; it is reported as
/// [`WriteOutcome::Conflict`](crate::WriteOutcome::Conflict).
#[derive(Error, Debug)]
pub enum FormError {
    /// Malformed identity, version or payload. Nothing was read or written.
    #[error("invalid form request: {0}")]
    Validation(String),

    /// The datastore could not be reached or rejected the statement.
    #[error("form storage failed: {0}")]
    Storage(String),

    /// A stored row does not decode into the document type.
    #[error("stored form could not be decoded: {0}")]
    Decode(String),
}

impl From<DbError> for FormError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::DeserializeError(reason) | DbError::TypeError(reason) => {
                FormError::Decode(reason)
            }
            other => FormError::Storage(other.to_string()),
        }
    }
}

impl FormError {
    /// HTTP status the endpoint answers with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code placed in the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request",
            Self::Storage(_) => "storage_unavailable",
            Self::Decode(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(FormError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            FormError::Storage("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(FormError::Decode("x".into()).code(), "internal_error");
    }

    #[test]
    fn test_db_error_mapping() {
        assert!(matches!(
            FormError::from(DbError::QueryError("locked".into())),
            FormError::Storage(_)
        ));
        assert!(matches!(
            FormError::from(DbError::DeserializeError("bad".into())),
            FormError::Decode(_)
        ));
    }
}
