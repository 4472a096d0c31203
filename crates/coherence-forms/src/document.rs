//! Form documents and write outcomes.

use serde::{Deserialize, Serialize};

/// Body of a collaborative form: a JSON object.
pub type FormData = serde_json::Map<String, serde_json::Value>;

/// Metadata of an uploaded file. The content itself lives in external storage
/// under `storage_ref`; size and type checks happen before the write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub storage_ref: String,
    /// Hex-encoded SHA-256 of the content.
    pub sha256: String,
}

/// A document at a specific version. Version 0 means no row exists yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDocument<T> {
    pub form_key: String,
    pub version: i64,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Current state returned to a writer whose expected version was stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport<T> {
    pub form_key: String,
    pub current_version: i64,
    pub current_data: T,
}

/// Result of a compare-and-set write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
    Committed(FormDocument<T>),
    Conflict(ConflictReport<T>),
}

impl<T> WriteOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    pub fn committed(self) -> Option<FormDocument<T>> {
        match self {
            Self::Committed(doc) => Some(doc),
            Self::Conflict(_) => None,
        }
    }

    pub fn conflict(self) -> Option<ConflictReport<T>> {
        match self {
            Self::Committed(_) => None,
            Self::Conflict(report) => Some(report),
        }
    }
}
