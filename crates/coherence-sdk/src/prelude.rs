//! Prelude for convenient imports.
//!
//! ```rust,ignore
//! use coherence_sdk::prelude::*;
//! ```

pub use crate::{Coherence, CoherenceConfig, ContentService, SdkError};

pub use coherence_cache::prelude::*;
pub use coherence_forms::prelude::*;
pub use coherence_observability::{init_logging, request_span, LogConfig, RequestId};
