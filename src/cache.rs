//! Tiered cache (L5): a `sled`-backed tier 1 in front of the store's tier 2
//! `get_complete_view`, with per-key single-flight so concurrent misses on
//! the same dataset collapse into one rebuild. Grounded on the teacher's
//! `CacheEntry<T>` TTL envelope (`repositories/cache.rs`), adapted from
//! in-memory storage to a `sled` tree.

use crate::store::{AggregateView, Store};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    value: AggregateView,
    expires_at: u64,
    created_at: u64,
}

impl CacheEntry {
    fn new(value: AggregateView, ttl: Duration) -> Self {
        let now = now_secs();
        Self {
            value,
            expires_at: now + ttl.as_secs(),
            created_at: now,
        }
    }

    fn is_expired(&self) -> bool {
        now_secs() >= self.expires_at
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub invalidations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Tier-1 cache in front of the unified store. Degrades to "always miss,
/// never write" if the `sled` tree fails to open — logged once, not fatal.
pub struct Cache {
    tree: Option<sled::Db>,
    ttl: Duration,
    inflight: Mutex<HashMap<String, Arc<Notify>>>,
    stats: Mutex<CacheStats>,
}

impl Cache {
    pub fn open(cache_path: &Path, ttl: Duration) -> Self {
        let tree = match sled::open(cache_path) {
            Ok(db) => Some(db),
            Err(err) => {
                warn!(error = %err, path = %cache_path.display(), "cache tier-1 unavailable, running degraded");
                None
            }
        };
        Self {
            tree,
            ttl,
            inflight: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn with_default_ttl(cache_path: &Path) -> Self {
        Self::open(cache_path, DEFAULT_TTL)
    }

    fn get_local(&self, dataset_id: &str) -> Option<AggregateView> {
        let tree = self.tree.as_ref()?;
        let bytes = tree.get(dataset_id.as_bytes()).ok().flatten()?;
        let entry: CacheEntry = serde_json::from_slice(&bytes).ok()?;
        if entry.is_expired() {
            let _ = tree.remove(dataset_id.as_bytes());
            self.stats.lock().unwrap().expirations += 1;
            return None;
        }
        Some(entry.value)
    }

    fn put_local(&self, dataset_id: &str, view: &AggregateView) {
        let Some(tree) = self.tree.as_ref() else {
            return;
        };
        let entry = CacheEntry::new(view.clone(), self.ttl);
        if let Ok(bytes) = serde_json::to_vec(&entry) {
            let _ = tree.insert(dataset_id.as_bytes(), bytes);
        }
    }

    /// Fetch a dataset's aggregate view, rebuilding from the store on a
    /// cache miss. Concurrent misses on the same `dataset_id` single-flight:
    /// only the first caller hits the store, the rest await its result.
    pub async fn get_or_load(&self, store: &Store, dataset_id: &str) -> Result<Option<AggregateView>> {
        if let Some(view) = self.get_local(dataset_id) {
            self.stats.lock().unwrap().hits += 1;
            debug!(dataset_id, "cache hit");
            return Ok(Some(view));
        }

        let notify = {
            let mut inflight = self.inflight.lock().unwrap();
            if let Some(existing) = inflight.get(dataset_id) {
                Some(existing.clone())
            } else {
                inflight.insert(dataset_id.to_string(), Arc::new(Notify::new()));
                None
            }
        };

        if let Some(notify) = notify {
            notify.notified().await;
            return Ok(self.get_local(dataset_id));
        }

        self.stats.lock().unwrap().misses += 1;
        debug!(dataset_id, "cache miss, rebuilding from store");
        let result = store.get_complete_view(dataset_id).await;

        if let Ok(Some(view)) = &result {
            self.put_local(dataset_id, view);
        }

        let notify = self.inflight.lock().unwrap().remove(dataset_id);
        if let Some(notify) = notify {
            notify.notify_waiters();
        }

        result
    }

    pub fn invalidate(&self, dataset_id: &str) {
        if let Some(tree) = &self.tree {
            let _ = tree.remove(dataset_id.as_bytes());
        }
        self.stats.lock().unwrap().invalidations += 1;
        info!(dataset_id, "cache entry invalidated");
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Dataset;
    use tempfile::tempdir;

    fn sample_view(dataset_id: &str) -> AggregateView {
        AggregateView {
            dataset: Dataset::new(dataset_id),
            original: Vec::new(),
            citing: Vec::new(),
            per_publication: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn miss_then_hit_on_same_key() {
        let dir = tempdir().unwrap();
        let cache = Cache::with_default_ttl(&dir.path().join("cache.sled"));
        let store = Store::open(&dir.path().join("db.sqlite3")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_dataset(&sample_view("GSE1").dataset).await.unwrap();
        tx.commit().await.unwrap();

        let first = cache.get_or_load(&store, "GSE1").await.unwrap();
        assert!(first.is_some());
        assert_eq!(cache.stats().misses, 1);

        let second = cache.get_or_load(&store, "GSE1").await.unwrap();
        assert!(second.is_some());
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_rebuild() {
        let dir = tempdir().unwrap();
        let cache = Cache::with_default_ttl(&dir.path().join("cache.sled"));
        let store = Store::open(&dir.path().join("db.sqlite3")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_dataset(&sample_view("GSE2").dataset).await.unwrap();
        tx.commit().await.unwrap();

        cache.get_or_load(&store, "GSE2").await.unwrap();
        cache.invalidate("GSE2");
        let after = cache.get_or_load(&store, "GSE2").await.unwrap();
        assert!(after.is_some());
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn expired_entry_counts_as_a_miss() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(&dir.path().join("cache.sled"), Duration::from_secs(0));
        let store = Store::open(&dir.path().join("db.sqlite3")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_dataset(&sample_view("GSE3").dataset).await.unwrap();
        tx.commit().await.unwrap();

        cache.get_or_load(&store, "GSE3").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.get_or_load(&store, "GSE3").await.unwrap();
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn degraded_mode_when_sled_cannot_open() {
        // Passing a path that collides with an existing file (not a dir sled
        // can open as a tree) should degrade gracefully rather than panic.
        let dir = tempdir().unwrap();
        let path = dir.path().join("not_a_db");
        std::fs::write(&path, b"not a sled db").unwrap();
        let cache = Cache::open(&path, DEFAULT_TTL);
        assert!(cache.get_local("anything").is_none());
    }
}
