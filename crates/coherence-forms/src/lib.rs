//! Collaborative form documents with optimistic concurrency control.
//!
//! This crate provides:
//! - `FormIdentity` - Validated scope tuple addressing one document
//! - `OccStore` - Compare-and-set document store (`FormStore`, `AttachmentStore`)
//! - `WriteOutcome` - Committed document or conflict report
//! - `respond` - The JSON envelope and status codes of the form endpoints
//!
//! # Example
//!
//! ```ignore
//! use coherence_forms::prelude::*;
//!
//! let store = FormStore::forms(db);
//! let id = FormIdentity::new("acc-01", 3, 42, 1, "action_plan")?;
//!
//! let doc = store.read(&id)?;
//! match store.write(&id, doc.version, &edited)? {
//!     WriteOutcome::Committed(doc) => println!("saved v{}", doc.version),
//!     WriteOutcome::Conflict(report) => merge(report.current_data),
//! }
//! ```

mod document;
mod endpoint;
mod error;
mod identity;
mod store;

pub use document::*;
pub use endpoint::*;
pub use error::*;
pub use identity::*;
pub use store::*;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        respond, AttachmentMeta, AttachmentStore, ConflictReport, FormData, FormDocument,
        FormEnvelope, FormError, FormIdentity, FormRequest, FormStore, OccStore, WriteOutcome,
    };
}
