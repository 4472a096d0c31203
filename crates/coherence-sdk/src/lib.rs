//! # Coherence SDK
//!
//! Consistency layer for derived training content and collaborative forms,
//! shared by many short-lived workers over one SQLite datastore.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use coherence_sdk::prelude::*;
//!
//! let config = CoherenceConfig::load("coherence.toml")?;
//! init_logging(&config.logging)?;
//! let runtime = Coherence::open(config)?;
//!
//! // Published content, built at most once per schema version.
//! let content = runtime.content();
//! let dims = KeyDimensions::new().module("m01").language("en");
//! let outline = content.get(&dims, &ScenarioOutlineBuilder, &content_db).await?;
//!
//! // Collaborative forms with optimistic concurrency.
//! let (status, envelope) = respond(runtime.forms(), &identity, request);
//! ```
//!
//! ## Guarantees
//!
//! - A published row for a (key code, schema version) is written once and never
//!   rewritten; bump the builder's schema version to publish new content.
//! - Form writes are single compare-and-set statements: concurrent writers with
//!   the same expected version get exactly one success.

mod config;
mod runtime;
mod service;

pub mod prelude;

pub use config::*;
pub use runtime::*;
pub use service::*;

// Re-export the layer crates
pub use coherence_cache;
pub use coherence_db;
pub use coherence_forms;
pub use coherence_observability;
