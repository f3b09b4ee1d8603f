// Local response cache for upstream search calls
// Content-addressed by the canonical parameter hash, bounded by a TTL, persisted as one JSON file.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::params::SearchParams;

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hit_count: AtomicUsize,
    pub miss_count: AtomicUsize,
    pub expired_count: AtomicUsize,
    pub store_count: AtomicUsize,
    pub pruned_count: AtomicUsize,
    pub corrupt_loads: AtomicUsize,
    pub failed_writes: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStatsReport {
    pub hit_count: usize,
    pub miss_count: usize,
    pub expired_count: usize,
    pub store_count: usize,
    pub pruned_count: usize,
    pub corrupt_loads: usize,
    pub failed_writes: usize,
}

// Cache trait. Implementations must never fail the caller: a broken cache behaves like an empty one.
pub trait ResponseCache: Send + Sync + 'static {
    // Fresh response for these parameters, if any
    fn lookup(&self, params: &SearchParams) -> Option<Value>;

    // Store a response and prune every expired entry.
    // Returns true if the cache was persisted.
    fn store(&self, params: &SearchParams, response: &Value) -> bool;

    fn stats(&self) -> CacheStatsReport;
}

// SHA-256 over the name-sorted parameters, credential excluded
pub fn cache_key(params: &SearchParams) -> String {
    let canonical = params.without_credentials();
    let serialized = serde_json::to_string(&canonical).unwrap_or_default();
    let digest = Sha256::digest(serialized.as_bytes());
    hex::encode(digest)
}

fn now_timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    // Unix seconds
    pub timestamp: f64,
    pub response: Value,
}

impl CacheEntry {
    fn age_seconds(&self, now: f64) -> f64 {
        now - self.timestamp
    }

    fn is_expired(&self, now: f64, ttl: Duration) -> bool {
        self.age_seconds(now) > ttl.as_secs_f64()
    }
}

pub struct FileResponseCache {
    path: PathBuf,
    ttl: Duration,
    // Serializes load/modify/save of the file
    lock: Mutex<()>,
    stats: CacheStats,
}

impl FileResponseCache {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
            lock: Mutex::new(()),
            stats: CacheStats::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> HashMap<String, CacheEntry> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return HashMap::new(),
        };
        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                self.stats.corrupt_loads.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(path = %self.path.display(), error = %e, "unreadable cache file, treating as empty");
                HashMap::new()
            }
        }
    }

    fn save(&self, mut entries: HashMap<String, CacheEntry>, now: f64) -> bool {
        let ttl_secs = self.ttl.as_secs_f64();
        let before = entries.len();
        entries.retain(|_, entry| entry.age_seconds(now) < ttl_secs);
        let pruned = before - entries.len();
        if pruned > 0 {
            self.stats.pruned_count.fetch_add(pruned, Ordering::SeqCst);
            tracing::debug!(pruned, remaining = entries.len(), "pruned expired cache entries");
        }

        let written = serde_json::to_string(&entries)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(&self.path, json).map_err(|e| e.to_string()));
        match written {
            Ok(()) => true,
            Err(e) => {
                self.stats.failed_writes.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(path = %self.path.display(), error = %e, "failed to persist cache");
                false
            }
        }
    }

    pub(crate) fn lookup_at(&self, params: &SearchParams, now: f64) -> Option<Value> {
        let key = cache_key(params);
        let _guard = self.lock.lock();
        let mut entries = self.load();

        match entries.remove(&key) {
            Some(entry) if entry.is_expired(now, self.ttl) => {
                self.stats.expired_count.fetch_add(1, Ordering::SeqCst);
                self.stats.miss_count.fetch_add(1, Ordering::SeqCst);
                None
            }
            Some(entry) => {
                self.stats.hit_count.fetch_add(1, Ordering::SeqCst);
                Some(entry.response)
            }
            None => {
                self.stats.miss_count.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    pub(crate) fn store_at(&self, params: &SearchParams, response: &Value, timestamp: f64) -> bool {
        let key = cache_key(params);
        let _guard = self.lock.lock();
        let mut entries = self.load();
        entries.insert(
            key,
            CacheEntry {
                timestamp,
                response: response.clone(),
            },
        );
        self.stats.store_count.fetch_add(1, Ordering::SeqCst);
        self.save(entries, now_timestamp())
    }

    pub fn len(&self) -> usize {
        let _guard = self.lock.lock();
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResponseCache for FileResponseCache {
    fn lookup(&self, params: &SearchParams) -> Option<Value> {
        self.lookup_at(params, now_timestamp())
    }

    fn store(&self, params: &SearchParams, response: &Value) -> bool {
        self.store_at(params, response, now_timestamp())
    }

    fn stats(&self) -> CacheStatsReport {
        CacheStatsReport {
            hit_count: self.stats.hit_count.load(Ordering::SeqCst),
            miss_count: self.stats.miss_count.load(Ordering::SeqCst),
            expired_count: self.stats.expired_count.load(Ordering::SeqCst),
            store_count: self.stats.store_count.load(Ordering::SeqCst),
            pruned_count: self.stats.pruned_count.load(Ordering::SeqCst),
            corrupt_loads: self.stats.corrupt_loads.load(Ordering::SeqCst),
            failed_writes: self.stats.failed_writes.load(Ordering::SeqCst),
        }
    }
}
