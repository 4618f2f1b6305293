//! Time-to-live result cache.
//!
//! Memoizes expensive derived results (aggregated embeddings, corpus
//! stats). Entries are never returned after their expiry; stale entries
//! are dropped when read.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: DateTime<Utc>,
}

pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), DEFAULT_TTL)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn put<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    /// Store `value` until now + `ttl`, replacing any existing entry.
    pub fn put_with_ttl<T: Any + Send + Sync>(&self, key: &str, value: T, ttl: Duration) {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let entry = CacheEntry { value: Arc::new(value), expires_at };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), entry);
    }

    /// The live value under `key`, if any and if it has type `T`.
    pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            let entry = entries.get(key)?;
            if now < entry.expires_at {
                return entry.value.downcast_ref::<T>().cloned();
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).map(|e| now >= e.expires_at).unwrap_or(false) {
            entries.remove(key);
            debug!(key, "Dropped expired cache entry");
        }
        None
    }

    pub fn invalidate(&self, key: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (Arc<ManualClock>, ResultCache) {
        let clock = Arc::new(ManualClock::default());
        let cache = ResultCache::with_clock(clock.clone(), DEFAULT_TTL);
        (clock, cache)
    }

    #[test]
    fn test_get_before_expiry() {
        let (_, cache) = cache();
        cache.put("k", vec![1u32, 2]);
        assert_eq!(cache.get::<Vec<u32>>("k"), Some(vec![1, 2]));
    }

    #[test]
    fn test_expired_entry_is_absent_and_purged() {
        let (clock, cache) = cache();
        cache.put_with_ttl("k", 7u64, Duration::from_secs(60));
        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get::<u64>("k"), Some(7));
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get::<u64>("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_default_ttl_is_twelve_hours() {
        let (clock, cache) = cache();
        cache.put("k", "v".to_string());
        clock.advance(Duration::from_secs(12 * 3600 - 1));
        assert!(cache.get::<String>("k").is_some());
        clock.advance(Duration::from_secs(1));
        assert!(cache.get::<String>("k").is_none());
    }

    #[test]
    fn test_missing_key_and_wrong_type() {
        let (_, cache) = cache();
        assert_eq!(cache.get::<u64>("never-set"), None);
        cache.put("k", 1u64);
        assert_eq!(cache.get::<String>("k"), None);
    }

    #[test]
    fn test_put_overwrites_and_refreshes_expiry() {
        let (clock, cache) = cache();
        cache.put_with_ttl("k", 1u64, Duration::from_secs(10));
        clock.advance(Duration::from_secs(8));
        cache.put_with_ttl("k", 2u64, Duration::from_secs(10));
        clock.advance(Duration::from_secs(8));
        assert_eq!(cache.get::<u64>("k"), Some(2));
        cache.invalidate("k");
        assert_eq!(cache.get::<u64>("k"), None);
    }
}
