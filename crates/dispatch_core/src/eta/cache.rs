use std::num::NonZeroUsize;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::model::Coordinate;

/// Coordinates are keyed at 6 decimal degrees (~11 cm).
const KEY_SCALE: f64 = 1e6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtaCacheConfig {
    pub ttl: Duration,
    /// Upper bound on live entries; least recently written entries are evicted first.
    pub capacity: usize,
}

impl Default for EtaCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            capacity: 50_000,
        }
    }
}

impl EtaCacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RouteKey {
    from: (i64, i64),
    to: (i64, i64),
}

impl RouteKey {
    fn new(from: Coordinate, to: Coordinate) -> Self {
        Self {
            from: quantize(from),
            to: quantize(to),
        }
    }
}

fn quantize(c: Coordinate) -> (i64, i64) {
    (
        (c.lat * KEY_SCALE).round() as i64,
        (c.lon * KEY_SCALE).round() as i64,
    )
}

#[derive(Debug, Clone, Copy)]
struct CachedEta {
    seconds: f64,
    stored_at: Instant,
}

/// TTL cache of ETA estimates keyed by the directional (from, to) pair.
///
/// Expired entries are removed lazily by the `get` that finds them; there is no sweep.
#[derive(Debug)]
pub struct EtaCache {
    entries: RwLock<LruCache<RouteKey, CachedEta>>,
    ttl: Duration,
}

impl EtaCache {
    pub fn new(config: EtaCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            ttl: config.ttl,
        }
    }

    /// Cached estimate if present and younger than the TTL.
    pub fn get(&self, from: Coordinate, to: Coordinate) -> Option<f64> {
        let key = RouteKey::new(from, to);
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.peek(&key) {
                None => return None,
                Some(entry) if entry.stored_at.elapsed() <= self.ttl => return Some(entry.seconds),
                Some(_) => {}
            }
        }

        // Stale: re-check under the write lock, a concurrent `set` may have refreshed it.
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries
            .peek(&key)
            .is_some_and(|entry| entry.stored_at.elapsed() > self.ttl)
        {
            entries.pop(&key);
        }
        None
    }

    /// Store an estimate, overwriting any previous value for the pair.
    pub fn set(&self, from: Coordinate, to: Coordinate, seconds: f64) {
        let key = RouteKey::new(from, to);
        let entry = CachedEta {
            seconds,
            stored_at: Instant::now(),
        };
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.put(key, entry);
    }

    /// Entries currently held, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EtaCache {
    fn default() -> Self {
        Self::new(EtaCacheConfig::default())
    }
}
