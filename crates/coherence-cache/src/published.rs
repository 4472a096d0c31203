//! Build-once published content cache.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use coherence_db::Db;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::builder::{find_null, ContentBuilder};
use crate::error::CacheError;
use crate::key::{KeyDimensions, PublishKey};
use crate::local::{LocalTier, RequestMemo};
use crate::mutex::DistributedMutex;
use crate::store::{PublishedRow, PublishedStore};

/// Tunables for [`PublishedContentCache`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Longest a caller waits for another process's build.
    pub lock_wait: Duration,
    /// Recorded as `built_by` on every row this process publishes.
    pub built_by: String,
    /// TTL of the process-local tier. Zero disables it.
    pub local_ttl: Duration,
    pub local_capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(10),
            built_by: "coherence".to_string(),
            local_ttl: Duration::from_secs(30),
            local_capacity: 1024,
        }
    }
}

/// Where a served payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Request memo or process-local tier.
    Local,
    /// Published row for the requested schema version.
    Hit,
    /// Built and published by this call.
    Built,
    /// The build lock timed out and a row for a different schema version was
    /// served instead.
    Degraded,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "LOCAL"),
            Self::Hit => write!(f, "HIT"),
            Self::Built => write!(f, "BUILT"),
            Self::Degraded => write!(f, "DEGRADED"),
        }
    }
}

/// A payload and how it was obtained.
#[derive(Debug, Clone)]
pub struct Published<T> {
    pub payload: T,
    /// Schema version of the row the payload was read from. Differs from the
    /// requested version only when `status` is [`CacheStatus::Degraded`].
    pub schema_version: u32,
    pub status: CacheStatus,
}

impl<T> Published<T> {
    pub fn is_degraded(&self) -> bool {
        self.status == CacheStatus::Degraded
    }
}

/// Read-through cache that guarantees each (key code, schema version) is built
/// at most once across all processes sharing the datastore, provided builds
/// finish within the lease TTL.
///
/// Lookup order: request memo, local tier, published row, then a build under
/// the key's distributed lock.
pub struct PublishedContentCache<M: DistributedMutex> {
    store: PublishedStore,
    mutex: Arc<M>,
    local: LocalTier,
    settings: CacheSettings,
}

impl<M: DistributedMutex> PublishedContentCache<M> {
    pub fn new(db: Arc<Db>, mutex: Arc<M>, settings: CacheSettings) -> Self {
        let local = LocalTier::new(settings.local_ttl, settings.local_capacity);
        Self {
            store: PublishedStore::new(db),
            mutex,
            local,
            settings,
        }
    }

    pub fn store(&self) -> &PublishedStore {
        &self.store
    }

    pub fn local(&self) -> &LocalTier {
        &self.local
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Return the published payload for `dims`, building and publishing it if
    /// no row exists yet.
    pub async fn get_or_build<B: ContentBuilder>(
        &self,
        dims: &KeyDimensions,
        builder: &B,
        ctx: &B::Context,
    ) -> Result<Published<B::Payload>, CacheError> {
        let key = PublishKey::for_builder::<B>(dims)?;
        self.resolve(&key, builder, ctx, None).await
    }

    /// Like [`get_or_build`](Self::get_or_build), consulting and filling a
    /// request-scoped memo first.
    pub async fn get_or_build_memo<B: ContentBuilder>(
        &self,
        dims: &KeyDimensions,
        builder: &B,
        ctx: &B::Context,
        memo: &RequestMemo,
    ) -> Result<Published<B::Payload>, CacheError> {
        let key = PublishKey::for_builder::<B>(dims)?;
        self.resolve(&key, builder, ctx, Some(memo)).await
    }

    /// Make sure the row for `dims` exists, for warming out of band. Unlike
    /// [`get_or_build`](Self::get_or_build) there is no degraded fallback: a
    /// lock timeout is reported as [`CacheError::LockTimeout`].
    pub async fn prewarm<B: ContentBuilder>(
        &self,
        dims: &KeyDimensions,
        builder: &B,
        ctx: &B::Context,
    ) -> Result<CacheStatus, CacheError> {
        let key = PublishKey::for_builder::<B>(dims)?;
        if self.store.get(key.key_code(), key.schema_version())?.is_some() {
            return Ok(CacheStatus::Hit);
        }

        let lock = key.lock_name();
        let Some(handle) = self.mutex.acquire(&lock, self.settings.lock_wait).await? else {
            return Err(CacheError::LockTimeout { lock });
        };
        let built = self.build_locked(&key, builder, ctx);
        self.release(handle).await;

        let (_, value, status) = built?;
        self.local.insert(&key.row_key(), value);
        Ok(status)
    }

    async fn resolve<B: ContentBuilder>(
        &self,
        key: &PublishKey,
        builder: &B,
        ctx: &B::Context,
        memo: Option<&RequestMemo>,
    ) -> Result<Published<B::Payload>, CacheError> {
        let row_key = key.row_key();

        if let Some(value) = memo.and_then(|memo| memo.get(&row_key)) {
            return Ok(published(decode(&row_key, value)?, key, CacheStatus::Local));
        }
        if let Some(value) = self.local.get(&row_key) {
            let payload = decode(&row_key, value.clone())?;
            remember(memo, &row_key, value);
            return Ok(published(payload, key, CacheStatus::Local));
        }

        if let Some(row) = self.store.get(key.key_code(), key.schema_version())? {
            let (payload, value) = decode_row(&row)?;
            debug!(key = %key, "published row hit");
            self.fill(memo, &row_key, value);
            return Ok(published(payload, key, CacheStatus::Hit));
        }

        let lock = key.lock_name();
        let Some(handle) = self.mutex.acquire(&lock, self.settings.lock_wait).await? else {
            return self.after_timeout(key, memo);
        };

        let built = self.build_locked(key, builder, ctx);
        self.release(handle).await;

        let (payload, value, status) = built?;
        self.fill(memo, &row_key, value);
        Ok(published(payload, key, status))
    }

    /// Lock wait expired: serve whatever has been published, if anything.
    fn after_timeout<T: DeserializeOwned>(
        &self,
        key: &PublishKey,
        memo: Option<&RequestMemo>,
    ) -> Result<Published<T>, CacheError> {
        if let Some(row) = self.store.get(key.key_code(), key.schema_version())? {
            let (payload, value) = decode_row(&row)?;
            self.fill(memo, &row.row_key(), value);
            return Ok(published(payload, key, CacheStatus::Hit));
        }

        let unavailable = || CacheError::BuildUnavailable {
            key_code: key.key_code().to_string(),
        };
        let Some(row) = self.store.latest(key.key_code())? else {
            warn!(key = %key, "build lock timed out and nothing is published");
            return Err(unavailable());
        };

        match decode_row::<T>(&row) {
            Ok((payload, _)) => {
                warn!(
                    key = %key,
                    served_version = row.schema_version,
                    "build lock timed out, serving another schema version"
                );
                Ok(Published {
                    payload,
                    schema_version: row.schema_version,
                    status: CacheStatus::Degraded,
                })
            }
            Err(e) => {
                warn!(key = %key, error = %e, "build lock timed out and fallback row does not decode");
                Err(unavailable())
            }
        }
    }

    /// Runs with the build lock held.
    fn build_locked<B: ContentBuilder>(
        &self,
        key: &PublishKey,
        builder: &B,
        ctx: &B::Context,
    ) -> Result<(B::Payload, serde_json::Value, CacheStatus), CacheError> {
        if let Some(row) = self.store.get(key.key_code(), key.schema_version())? {
            debug!(key = %key, "published while waiting for lock");
            let (payload, value) = decode_row(&row)?;
            return Ok((payload, value, CacheStatus::Hit));
        }

        if let Some(highest) = self.store.highest_version(key.key_code())? {
            if highest > key.schema_version() {
                warn!(
                    key = %key,
                    highest_version = highest,
                    "building an older schema version than the newest published"
                );
            }
        }

        let failure = |detail: String| {
            error!(key = %key, detail = %detail, "content build failed");
            CacheError::BuildFailure {
                key_code: key.key_code().to_string(),
                detail,
            }
        };

        info!(key = %key, "building content");
        let started = std::time::Instant::now();
        // A panicking builder must not skip the lease release in the caller.
        let payload = panic::catch_unwind(AssertUnwindSafe(|| builder.build(ctx)))
            .map_err(|cause| failure(format!("builder panicked: {}", panic_message(&*cause))))?
            .map_err(|e| failure(format!("{e:#}")))?;
        let value = serde_json::to_value(&payload)
            .map_err(|e| failure(format!("payload does not serialize: {e}")))?;
        if let Some(path) = find_null(&value) {
            return Err(failure(format!("payload contains null at {path}")));
        }

        let row = PublishedRow {
            key_code: key.key_code().to_string(),
            schema_version: key.schema_version(),
            json_payload: value.to_string(),
            built_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            built_by: self.settings.built_by.clone(),
        };

        if self.store.insert_if_absent(&row)? {
            info!(
                key = %key,
                bytes = row.json_payload.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "published content"
            );
            return Ok((payload, value, CacheStatus::Built));
        }

        // Only reachable when another builder took over a lapsed lease.
        warn!(key = %key, "row published concurrently, serving the stored row");
        let stored = self
            .store
            .get(key.key_code(), key.schema_version())?
            .ok_or_else(|| CacheError::Storage(format!("row {} vanished after insert", key)))?;
        let (payload, value) = decode_row(&stored)?;
        Ok((payload, value, CacheStatus::Hit))
    }

    async fn release(&self, handle: crate::mutex::LockHandle) {
        let name = handle.name().to_string();
        match self.mutex.release(handle).await {
            Ok(true) => {}
            Ok(false) => warn!(lock = %name, "lease lapsed before release"),
            Err(e) => warn!(lock = %name, error = %e, "failed to release lease"),
        }
    }

    fn fill(&self, memo: Option<&RequestMemo>, row_key: &str, value: serde_json::Value) {
        remember(memo, row_key, value.clone());
        self.local.insert(row_key, value);
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(message) = cause.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn remember(memo: Option<&RequestMemo>, row_key: &str, value: serde_json::Value) {
    if let Some(memo) = memo {
        memo.insert(row_key, value);
    }
}

fn published<T>(payload: T, key: &PublishKey, status: CacheStatus) -> Published<T> {
    Published {
        payload,
        schema_version: key.schema_version(),
        status,
    }
}

fn decode<T: DeserializeOwned>(row_key: &str, value: serde_json::Value) -> Result<T, CacheError> {
    serde_json::from_value(value).map_err(|e| CacheError::Decode {
        row_key: row_key.to_string(),
        reason: e.to_string(),
    })
}

fn decode_row<T: DeserializeOwned>(row: &PublishedRow) -> Result<(T, serde_json::Value), CacheError> {
    let value: serde_json::Value =
        serde_json::from_str(&row.json_payload).map_err(|e| CacheError::Decode {
            row_key: row.row_key(),
            reason: e.to_string(),
        })?;
    let payload = decode(&row.row_key(), value.clone())?;
    Ok((payload, value))
}
