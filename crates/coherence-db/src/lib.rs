//! Type-safe SQLite datastore layer for the coherence runtime.
//!
//! The datastore is the single arbiter of truth for published content rows,
//! publish leases and collaborative form documents. This crate exposes a small
//! statement API; all coordination is expressed as single atomic statements by
//! the crates above it.
//!
//! # Example
//!
//! ```rust,ignore
//! use coherence_db::{Db, params};
//!
//! let db = Db::open("coherence.db")?;
//! db.migrate()?;
//!
//! let bumped = db.query(
//!     "UPDATE form_documents SET version = version + 1 WHERE form_key = ? AND version = ? RETURNING version",
//!     params!["notes", 3i64],
//! )?;
//! ```

mod db;
mod error;
pub mod schema;
mod types;

pub use db::Db;
#[cfg(not(target_arch = "wasm32"))]
pub use db::BUSY_TIMEOUT;
pub use error::DbError;
pub use types::{QueryResult, Row, Value};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{params, Db, DbError, QueryResult, Row, Value};
}

/// Create a parameter list for SQL statements.
///
/// # Example
///
/// ```rust,ignore
/// use coherence_db::params;
///
/// let params = params!["module-a", 2u32, None::<String>];
/// ```
#[macro_export]
macro_rules! params {
    () => {
        &[]
    };
    ($($param:expr),+ $(,)?) => {
        &[$($crate::Value::from($param)),+]
    };
}
