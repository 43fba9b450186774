use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Time source for TTL checks, swappable in tests so expiry can be
/// exercised without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

struct Inner<K, V> {
    store: RwLock<HashMap<K, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
}

/// Thread-safe in-memory cache with a per-entry TTL. Expired entries are
/// removed lazily on read; there is no background sweeper.
///
/// Cloning a `Cache` clones the handle, not the store: every clone shares
/// the same map and the same lock. The small get/set API keeps server logic
/// from manipulating the lock directly.
#[derive(Clone)]
pub struct Cache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Create a new empty cache backed by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Cache {
            inner: Arc::new(Inner {
                store: RwLock::new(HashMap::new()),
                clock,
            }),
        }
    }

    /// Look up a live entry. Returns a clone of the stored value, never a
    /// handle into the store. Absent and expired keys both come back `None`.
    pub fn get(&self, key: &K) -> Option<V> {
        {
            let store = self.inner.store.read().unwrap();
            match store.get(key) {
                None => return None,
                Some(entry) => {
                    if self.inner.clock.now() <= entry.expires_at {
                        return Some(entry.value.clone());
                    }
                }
            }
        }

        // Expired: the read lock is released above before taking the write
        // lock. Two readers can race here; removing an already-removed key
        // is a no-op.
        let mut store = self.inner.store.write().unwrap();
        store.remove(key);
        None
    }

    /// Insert or replace the entry for `key`, valid for `ttl` from now.
    /// Replacing a live entry replaces both value and expiration.
    /// A zero TTL is legal and yields an entry that is already dead once
    /// the clock moves past the insertion instant.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let expires_at = self.inner.clock.now() + ttl;
        let mut store = self.inner.store.write().unwrap();
        store.insert(key, CacheEntry { value, expires_at });
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;

    struct StubClock {
        now: Mutex<Instant>,
    }

    impl StubClock {
        fn new() -> Arc<Self> {
            Arc::new(StubClock {
                now: Mutex::new(Instant::now()),
            })
        }

        fn advance_by(&self, d: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += d;
        }
    }

    impl Clock for StubClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    fn store_len<K: Eq + Hash, V: Clone>(cache: &Cache<K, V>) -> usize {
        cache.inner.store.read().unwrap().len()
    }

    #[test]
    fn miss_on_empty_cache() {
        let cache: Cache<String, i32> = Cache::new();
        assert_eq!(cache.get(&"hello".to_string()), None);
    }

    #[test]
    fn set_then_get() {
        let cache = Cache::new();
        cache.set("hello".to_string(), 12, Duration::from_secs(5));
        assert_eq!(cache.get(&"hello".to_string()), Some(12));
    }

    #[test]
    fn ttl_expires_entry_and_removes_it() {
        let clock = StubClock::new();
        let cache = Cache::with_clock(clock.clone());
        let key = "hello".to_string();

        cache.set(key.clone(), 12, Duration::from_secs(5 * 60));

        assert_eq!(cache.get(&key), Some(12));

        clock.advance_by(Duration::from_secs(4 * 60));
        assert_eq!(cache.get(&key), Some(12));

        clock.advance_by(Duration::from_secs(61));
        assert_eq!(cache.get(&key), None);
        assert_eq!(store_len(&cache), 0);
    }

    #[test]
    fn overwrite_replaces_value_and_ttl() {
        let clock = StubClock::new();
        let cache = Cache::with_clock(clock.clone());
        let key = "hello".to_string();

        cache.set(key.clone(), 1, Duration::from_secs(60));
        cache.set(key.clone(), 2, Duration::from_secs(10 * 60));

        assert_eq!(cache.get(&key), Some(2));

        // Past the first TTL but inside the second: the entry must still be
        // live, proving expiry was recomputed on overwrite.
        clock.advance_by(Duration::from_secs(5 * 60));
        assert_eq!(cache.get(&key), Some(2));

        clock.advance_by(Duration::from_secs(6 * 60));
        assert_eq!(cache.get(&key), None);
    }

    #[test]
    fn zero_ttl_is_dead_on_next_read() {
        let clock = StubClock::new();
        let cache = Cache::with_clock(clock.clone());
        let key = "hello".to_string();

        cache.set(key.clone(), 12, Duration::ZERO);

        clock.advance_by(Duration::from_nanos(1));
        assert_eq!(cache.get(&key), None);
        assert_eq!(store_len(&cache), 0);
    }

    #[test]
    fn expired_key_removal_races_are_benign() {
        let clock = StubClock::new();
        let cache = Cache::with_clock(clock.clone());
        let key = "hello".to_string();

        cache.set(key.clone(), 12, Duration::from_secs(1));
        clock.advance_by(Duration::from_secs(2));

        // The first read removes the expired entry; the second must be a
        // plain miss, not an error.
        assert_eq!(cache.get(&key), None);
        assert_eq!(cache.get(&key), None);
        assert_eq!(store_len(&cache), 0);
    }

    #[test]
    fn works_across_key_and_value_types() {
        #[derive(Clone, Debug, PartialEq)]
        struct Point {
            x: i32,
            y: i32,
        }

        let by_id: Cache<i64, Point> = Cache::new();
        by_id.set(7, Point { x: 1, y: 2 }, Duration::from_secs(5));
        assert_eq!(by_id.get(&7), Some(Point { x: 1, y: 2 }));

        let lists: Cache<String, Vec<String>> = Cache::new();
        lists.set(
            "names".to_string(),
            vec!["a".to_string(), "b".to_string()],
            Duration::from_secs(5),
        );
        assert_eq!(
            lists.get(&"names".to_string()),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn concurrent_get_set_does_not_corrupt_store() {
        let cache: Cache<String, u64> = Cache::new();
        let threads = 8u64;
        let rounds = 500u64;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..rounds {
                        let key = format!("key-{}", i % 16);
                        cache.set(key.clone(), t * 10_000 + i, Duration::from_secs(60));
                        if let Some(v) = cache.get(&key) {
                            // Last-writer-wins: any observed value must be
                            // one some thread actually wrote.
                            assert!(v % 10_000 < rounds);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(store_len(&cache) <= 16);
    }
}
