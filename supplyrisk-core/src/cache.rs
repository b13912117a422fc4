//! Bounded, time-limited cache of finished assessments

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::assessment::Assessment;
use crate::risk::round2;

pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_CAPACITY: usize = 1000;

/// `(model id, country, sector, enriched)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub model: String,
    pub country: String,
    pub sector: String,
    pub enriched: bool,
}

impl CacheKey {
    pub fn new(model: &str, country: &str, sector: &str, enriched: bool) -> Self {
        CacheKey {
            model: model.to_string(),
            country: country.to_string(),
            sector: sector.to_string(),
            enriched,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub hit_rate_percent: f64,
    pub size: usize,
    pub capacity: usize,
    pub ttl_seconds: u64,
}

struct Entry {
    value: Arc<Assessment>,
    inserted: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    hits: u64,
    misses: u64,
}

/// Expired entries are dropped on lookup. When full, inserting a new key
/// evicts the oldest entry.
pub struct AssessmentCache {
    inner: Mutex<Inner>,
    ttl: Duration,
    capacity: usize,
}

impl Default for AssessmentCache {
    fn default() -> Self {
        AssessmentCache::new(DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}

impl AssessmentCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        AssessmentCache {
            inner: Mutex::new(Inner::default()),
            ttl,
            capacity,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Assessment>> {
        let mut inner = self.inner.lock();
        let found = inner
            .entries
            .get(key)
            .map(|entry| (entry.inserted.elapsed() < self.ttl, Arc::clone(&entry.value)));
        let fresh = match found {
            Some((true, value)) => Some(value),
            Some((false, _)) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        };
        match fresh {
            Some(value) => {
                inner.hits += 1;
                tracing::debug!(country = %key.country, sector = %key.sector, "assessment cache hit");
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn insert(&self, key: CacheKey, value: Arc<Assessment>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
            }
        }
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            inner.hits as f64 / total as f64 * 100.0
        };
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            total_requests: total,
            hit_rate_percent: round2(hit_rate),
            size: inner.entries.len(),
            capacity: self.capacity,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}
