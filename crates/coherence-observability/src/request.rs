//! Request correlation.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;

/// Unique request identifier for log correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new random request ID.
    pub fn generate() -> Self {
        let bytes: [u8; 12] = rand::thread_rng().gen();
        Self(format!("req_{}", URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Reuse an id handed over by the caller (e.g. an `x-request-id` header).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Open the span that every log line of one request is nested under.
///
/// ```rust,ignore
/// let span = request_span(&request_id);
/// async { service.payload(&dims, &ctx).await }.instrument(span).await
/// ```
pub fn request_span(request_id: &RequestId) -> tracing::Span {
    tracing::info_span!("request", request_id = %request_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_generate_format() {
        let id = RequestId::generate();
        assert!(id.as_str().starts_with("req_"));
        // 12 bytes base64 without padding = 16 chars
        assert_eq!(id.as_str().len(), 20);
    }

    #[test]
    fn test_request_id_uniqueness() {
        assert_ne!(RequestId::generate(), RequestId::generate());
    }

    #[test]
    fn test_request_id_from_string() {
        let id = RequestId::from_string("upstream-42");
        assert_eq!(id.to_string(), "upstream-42");
    }
}
