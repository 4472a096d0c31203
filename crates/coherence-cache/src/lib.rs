//! Build-once published content cache for the coherence runtime.
//!
//! This crate provides:
//! - `PublishKey` - Stable, injective keys for published artifacts
//! - `ContentBuilder` - Schema-versioned payload builders
//! - `DistributedMutex` / `SqlLeaseMutex` - Named locks with bounded waits
//! - `LocalTier` / `RequestMemo` - In-process tiers in front of the store
//! - `PublishedContentCache` - Read-through cache that builds each artifact once
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use coherence_cache::prelude::*;
//!
//! let mutex = Arc::new(SqlLeaseMutex::new(db.clone(), Duration::from_secs(60)));
//! let cache = PublishedContentCache::new(db, mutex, CacheSettings::default());
//!
//! let dims = KeyDimensions::new().module("m01").language("en");
//! let outline = cache.get_or_build(&dims, &ScenarioOutlineBuilder, &content_db).await?;
//! ```

mod builder;
mod error;
mod key;
mod local;
mod mutex;
mod published;
mod store;

pub use builder::*;
pub use error::*;
pub use key::*;
pub use local::*;
pub use mutex::*;
pub use published::*;
pub use store::*;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        CacheError, CacheSettings, CacheStatus, ContentBuilder, DistributedMutex, KeyDimensions,
        LockHandle, Published, PublishKey, PublishedContentCache, RequestMemo, SqlLeaseMutex,
    };
}
