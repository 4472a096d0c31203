//! Runtime wiring.

use std::sync::Arc;

use coherence_cache::{PublishedContentCache, SqlLeaseMutex};
use coherence_db::{Db, DbError};
use coherence_forms::{AttachmentStore, FormStore};
use thiserror::Error;

use crate::config::{CoherenceConfig, ConfigError, DatabaseConfig};
use crate::service::ContentService;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("database unavailable: {0}")]
    Database(#[from] DbError),
}

/// The published-content cache as wired by [`Coherence`].
pub type ContentCache = PublishedContentCache<SqlLeaseMutex>;

/// One datastore connection with the cache and form stores built on it.
///
/// In a Spin component, open one per request; natively one per process is
/// enough.
pub struct Coherence {
    config: CoherenceConfig,
    db: Arc<Db>,
    leases: Arc<SqlLeaseMutex>,
    cache: ContentCache,
    forms: FormStore,
    attachments: AttachmentStore,
}

impl Coherence {
    /// Open the configured database, create missing tables and wire the stores.
    pub fn open(config: CoherenceConfig) -> Result<Self, SdkError> {
        config.validate()?;
        let db = Arc::new(open_database(&config.database)?);
        db.migrate()?;
        tracing::info!(database = %config.database.path, "coherence runtime ready");
        Ok(Self::with_db(config, db))
    }

    /// Wire the stores over an already-migrated database.
    pub fn with_db(config: CoherenceConfig, db: Arc<Db>) -> Self {
        let leases = Arc::new(
            SqlLeaseMutex::new(Arc::clone(&db), config.cache.lease_ttl())
                .with_backoff(config.cache.backoff()),
        );
        let cache = PublishedContentCache::new(
            Arc::clone(&db),
            Arc::clone(&leases),
            config.cache.settings(),
        );

        Self {
            forms: FormStore::forms(Arc::clone(&db)),
            attachments: AttachmentStore::attachments(Arc::clone(&db)),
            config,
            db,
            leases,
            cache,
        }
    }

    pub fn config(&self) -> &CoherenceConfig {
        &self.config
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn leases(&self) -> &SqlLeaseMutex {
        &self.leases
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn forms(&self) -> &FormStore {
        &self.forms
    }

    pub fn attachments(&self) -> &AttachmentStore {
        &self.attachments
    }

    /// Content access scoped to one request.
    pub fn content(&self) -> ContentService<'_> {
        ContentService::new(&self.cache)
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn open_database(config: &DatabaseConfig) -> Result<Db, DbError> {
    Db::open_with_busy_timeout(&config.path, config.busy_timeout())
}

#[cfg(target_arch = "wasm32")]
fn open_database(_config: &DatabaseConfig) -> Result<Db, DbError> {
    Db::open_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> CoherenceConfig {
        CoherenceConfig::default().with_database_override(Some(":memory:".into()))
    }

    #[test]
    fn test_open_migrates() {
        let runtime = Coherence::open(memory_config()).unwrap();
        let tables = runtime
            .db()
            .query("SELECT name FROM sqlite_master WHERE type = 'table'", &[])
            .unwrap();
        assert_eq!(tables.len(), 4);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let mut config = memory_config();
        config.cache.lock_wait_ms = 0;
        assert!(matches!(
            Coherence::open(config),
            Err(SdkError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_open_unreachable_database() {
        let config = CoherenceConfig::default()
            .with_database_override(Some("/nonexistent-dir/sub/coherence.db".into()));
        assert!(matches!(Coherence::open(config), Err(SdkError::Database(_))));
    }
}
