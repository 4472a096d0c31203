//! Named, bounded-wait mutual exclusion backed by the shared datastore.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use coherence_db::{params, Db};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::LockError;

/// Proof of a held lock. Release it with [`DistributedMutex::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    name: String,
    owner: String,
}

impl LockHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

/// Cross-process mutual exclusion on a name.
#[async_trait]
pub trait DistributedMutex: Send + Sync {
    /// Wait up to `timeout` for the lock. `Ok(None)` means the wait timed out.
    async fn acquire(&self, name: &str, timeout: Duration)
        -> Result<Option<LockHandle>, LockError>;

    /// Release a held lock. Returns `false` if the lock had already lapsed and
    /// been taken over (or removed) by someone else.
    async fn release(&self, handle: LockHandle) -> Result<bool, LockError>;
}

/// Delay between lock polling attempts, doubling from `base` up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl PollBackoff {
    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        std::cmp::min(self.base.saturating_mul(multiplier), self.max)
    }
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(25),
            max: Duration::from_millis(250),
        }
    }
}

/// A row of the lease table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRow {
    pub name: String,
    pub owner: String,
    pub expires_at_ms: i64,
}

/// TTL lease on a row of `publish_leases`.
///
/// A lease can be taken when no row exists for the name or the existing row's
/// lease has expired; both cases are one conditional upsert. A holder that
/// crashes stops blocking others once its lease TTL passes. A holder that runs
/// longer than the TTL loses exclusivity, so the TTL has to exceed the slowest
/// build.
pub struct SqlLeaseMutex {
    db: Arc<Db>,
    lease_ttl: Duration,
    backoff: PollBackoff,
}

impl SqlLeaseMutex {
    pub fn new(db: Arc<Db>, lease_ttl: Duration) -> Self {
        Self {
            db,
            lease_ttl,
            backoff: PollBackoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: PollBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// One acquisition attempt.
    fn try_acquire(&self, name: &str, owner: &str) -> Result<bool, LockError> {
        let now = now_ms();
        let expires = now.saturating_add(duration_ms(self.lease_ttl));

        let result = self.db.query(
            "INSERT INTO publish_leases (name, owner, expires_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE
                SET owner = excluded.owner, expires_at_ms = excluded.expires_at_ms
              WHERE publish_leases.expires_at_ms <= ?4
             RETURNING owner",
            params![name, owner, expires, now],
        )?;

        Ok(result
            .first()
            .and_then(|row| row.get("owner"))
            .and_then(|v| v.as_text())
            == Some(owner))
    }

    /// Current lease row for a name, expired or not.
    pub fn lease(&self, name: &str) -> Result<Option<LeaseRow>, LockError> {
        Ok(self.db.query_optional(
            "SELECT name, owner, expires_at_ms FROM publish_leases WHERE name = ?1",
            params![name],
        )?)
    }

    /// Remove a lease regardless of owner. For operators clearing a lease left
    /// by a stuck builder.
    pub fn break_lease(&self, name: &str) -> Result<bool, LockError> {
        let removed = self.db.query(
            "DELETE FROM publish_leases WHERE name = ?1 RETURNING name",
            params![name],
        )?;
        Ok(!removed.is_empty())
    }
}

#[async_trait]
impl DistributedMutex for SqlLeaseMutex {
    async fn acquire(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<LockHandle>, LockError> {
        let owner = lease_token();
        let deadline = Instant::now() + timeout;
        let mut attempt = 0;

        loop {
            if self.try_acquire(name, &owner)? {
                tracing::debug!(lock = name, attempts = attempt + 1, "lease acquired");
                return Ok(Some(LockHandle {
                    name: name.to_string(),
                    owner,
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let delay = self.backoff.delay_for_attempt(attempt).min(deadline - now);
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }

    async fn release(&self, handle: LockHandle) -> Result<bool, LockError> {
        let removed = self.db.query(
            "DELETE FROM publish_leases WHERE name = ?1 AND owner = ?2 RETURNING name",
            params![handle.name.as_str(), handle.owner.as_str()],
        )?;
        Ok(!removed.is_empty())
    }
}

/// Fresh owner token for one acquisition.
fn lease_token() -> String {
    let bytes: [u8; 18] = rand::thread_rng().gen();
    format!("lease_{}", URL_SAFE_NO_PAD.encode(bytes))
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutex(ttl: Duration) -> SqlLeaseMutex {
        let db = Db::open_default().unwrap();
        db.migrate().unwrap();
        SqlLeaseMutex::new(Arc::new(db), ttl).with_backoff(PollBackoff {
            base: Duration::from_millis(5),
            max: Duration::from_millis(20),
        })
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = PollBackoff::default();
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(25));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(50));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_millis(250));
        assert_eq!(backoff.delay_for_attempt(40), Duration::from_millis(250));
    }

    #[test]
    fn test_lease_token_format() {
        let token = lease_token();
        assert!(token.starts_with("lease_"));
        assert_ne!(token, lease_token());
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let m = mutex(Duration::from_secs(60));
        let held = m.acquire("publish:a", Duration::ZERO).await.unwrap();
        assert!(held.is_some());

        let second = m.acquire("publish:a", Duration::from_millis(30)).await.unwrap();
        assert!(second.is_none());

        // Other names are independent.
        assert!(m.acquire("publish:b", Duration::ZERO).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_allows_reacquire() {
        let m = mutex(Duration::from_secs(60));
        let handle = m.acquire("publish:a", Duration::ZERO).await.unwrap().unwrap();
        assert!(m.release(handle).await.unwrap());
        assert!(m.lease("publish:a").unwrap().is_none());
        assert!(m.acquire("publish:a", Duration::ZERO).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let m = mutex(Duration::ZERO);
        let first = m.acquire("publish:a", Duration::ZERO).await.unwrap().unwrap();
        let second = m.acquire("publish:a", Duration::ZERO).await.unwrap().unwrap();
        assert_ne!(first.owner(), second.owner());

        // The lapsed holder must not remove the new holder's lease.
        assert!(!m.release(first).await.unwrap());
        let row = m.lease("publish:a").unwrap().unwrap();
        assert_eq!(row.owner, second.owner());
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let m = Arc::new(mutex(Duration::from_secs(60)));
        let handle = m.acquire("publish:a", Duration::ZERO).await.unwrap().unwrap();

        let waiter = {
            let m = Arc::clone(&m);
            tokio::spawn(async move { m.acquire("publish:a", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        m.release(handle).await.unwrap();

        let acquired = waiter.await.unwrap().unwrap();
        assert!(acquired.is_some());
    }

    #[tokio::test]
    async fn test_break_lease() {
        let m = mutex(Duration::from_secs(60));
        m.acquire("publish:a", Duration::ZERO).await.unwrap().unwrap();
        assert!(m.break_lease("publish:a").unwrap());
        assert!(!m.break_lease("publish:a").unwrap());
        assert!(m.acquire("publish:a", Duration::ZERO).await.unwrap().is_some());
    }
}
