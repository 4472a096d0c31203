//! In-process tiers in front of the durable store.
//!
//! Neither tier coordinates anything. They only save a round trip to the
//! datastore for rows that are already published, which is safe because a
//! published row never changes.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct LocalEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Short-TTL, bounded map from row key to decoded JSON payload.
pub struct LocalTier {
    entries: Mutex<HashMap<String, LocalEntry>>,
    ttl: Duration,
    capacity: usize,
}

impl LocalTier {
    /// Create a tier. A zero `ttl` or `capacity` disables it.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity,
        }
    }

    /// A tier that never stores anything.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, 0)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero() && self.capacity > 0
    }

    /// Fresh value for `row_key`. Expired entries are dropped on read.
    pub fn get(&self, row_key: &str) -> Option<serde_json::Value> {
        if !self.is_enabled() {
            return None;
        }
        let mut entries = self.entries.lock();
        match entries.get(row_key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(row_key);
                None
            }
            None => None,
        }
    }

    /// Store a value. When full, expired entries are purged first, then the
    /// entry closest to expiry is evicted.
    pub fn insert(&self, row_key: &str, value: serde_json::Value) {
        if !self.is_enabled() {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if !entries.contains_key(row_key) && entries.len() >= self.capacity {
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            row_key.to_string(),
            LocalEntry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Memo scoped to one request.
///
/// Create one per request and drop it when the request ends; nothing in it
/// outlives the request.
#[derive(Default)]
pub struct RequestMemo {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl RequestMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, row_key: &str) -> Option<serde_json::Value> {
        self.values.lock().get(row_key).cloned()
    }

    pub fn insert(&self, row_key: &str, value: serde_json::Value) {
        self.values.lock().insert(row_key.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
