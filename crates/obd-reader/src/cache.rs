//! Short-lived result cache

use obd_protocol::QueryDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for cached reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of cached live readings in milliseconds (default: 1000).
    /// Generic queries are kept for a third of this.
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_ms: 1000 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// How long an entry stays valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    After(Duration),
    /// Values that cannot change while the vehicle is connected (VIN)
    Never,
}

/// A cached decoded value
#[derive(Debug, Clone)]
pub enum CachedValue {
    Number(f64),
    Text(String),
    Query(QueryDescriptor),
}

#[derive(Debug)]
struct CacheEntry {
    stored_at: Instant,
    expiry: Expiry,
    value: CachedValue,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        match self.expiry {
            Expiry::After(ttl) => self.stored_at.elapsed() < ttl,
            Expiry::Never => true,
        }
    }
}

/// Results keyed by logical name
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh value for a key; expired entries are evicted
    pub fn get(&self, key: &str) -> Option<CachedValue> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_fresh() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: CachedValue, expiry: Expiry) {
        self.lock().insert(
            key.into(),
            CacheEntry {
                stored_at: Instant::now(),
                expiry,
                value,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
