//! Fingerprint-keyed result memoization with TTL caps, a tag reverse
//! index, write-triggered invalidation, and a periodic cleanup sweep.

use crate::cache::fingerprint::fingerprint;
use crate::cache::invalidation::{extract_table_names, patterns_for_table};
use crate::cache::store::CacheStore;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::value::Value;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};

/// What a cached query result must be able to report about itself so the
/// size policy can be enforced.
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync {
    fn row_count(&self) -> usize;
}

impl Cacheable for Vec<crate::connection::Row> {
    fn row_count(&self) -> usize {
        self.len()
    }
}

pub enum CacheKey {
    Fingerprint { sql: String, bindings: Vec<Value> },
    /// Bypasses fingerprinting entirely; used verbatim.
    Explicit(String),
}

#[derive(Debug, Clone)]
struct CacheMetadata {
    stored_at: Instant,
    ttl: Duration,
    tags: Vec<String>,
    approximate_size: usize,
    hits: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub avg_hit_time_ms: f64,
    pub avg_miss_time_ms: f64,
}

impl CacheStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct CacheStats {
    hits: u64,
    misses: u64,
    sets: u64,
    deletes: u64,
    evictions: u64,
    avg_hit_time_ms: f64,
    avg_miss_time_ms: f64,
}

impl CacheStats {
    fn record_hit(&mut self, elapsed: Duration) {
        self.hits += 1;
        self.avg_hit_time_ms = running_mean(self.avg_hit_time_ms, self.hits, elapsed.as_secs_f64() * 1000.0);
    }

    fn record_miss(&mut self, elapsed: Duration) {
        self.misses += 1;
        self.avg_miss_time_ms =
            running_mean(self.avg_miss_time_ms, self.misses, elapsed.as_secs_f64() * 1000.0);
    }

    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits,
            misses: self.misses,
            sets: self.sets,
            deletes: self.deletes,
            evictions: self.evictions,
            avg_hit_time_ms: self.avg_hit_time_ms,
            avg_miss_time_ms: self.avg_miss_time_ms,
        }
    }
}

fn running_mean(old_avg: f64, n: u64, sample: f64) -> f64 {
    (old_avg * (n.saturating_sub(1)) as f64 + sample) / n as f64
}

pub struct CacheCoordinator {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    metadata: RwLock<HashMap<String, CacheMetadata>>,
    tag_index: RwLock<HashMap<String, HashSet<String>>>,
    stats: Mutex<CacheStats>,
    single_flight: Option<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl CacheCoordinator {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        CacheCoordinator {
            store,
            config,
            metadata: RwLock::new(HashMap::new()),
            tag_index: RwLock::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
            single_flight: None,
        }
    }

    /// Enables the optional per-key single-flight guard. Without it, concurrent misses on the
    /// same key may both invoke `build` — tolerated, last write wins.
    pub fn with_single_flight(mut self) -> Self {
        self.single_flight = Some(Mutex::new(HashMap::new()));
        self
    }

    fn resolve_key(&self, key: &CacheKey) -> String {
        match key {
            CacheKey::Fingerprint { sql, bindings } => fingerprint(&self.config.prefix, sql, bindings),
            CacheKey::Explicit(k) => k.clone(),
        }
    }

    async fn try_get<T: Cacheable>(&self, cache_key: &str) -> Option<T> {
        match self.store.get(cache_key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::warn!(key = %cache_key, error = %err, "cache payload failed to deserialize, treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(key = %cache_key, error = %err, "cache get failed, treating as miss");
                None
            }
        }
    }

    async fn record_hit(&self, cache_key: &str, elapsed: Duration) {
        self.stats.lock().await.record_hit(elapsed);
        if let Some(entry) = self.metadata.write().await.get_mut(cache_key) {
            entry.hits += 1;
        }
    }

    async fn record_miss(&self, elapsed: Duration) {
        self.stats.lock().await.record_miss(elapsed);
    }

    /// The baseline get/set protocol: compute key, look up, increment
    /// hits on hit, otherwise run `build`, cache per the size policy, and
    /// return the result either way. Tolerates the documented read-then-
    /// write race between concurrent misses on the same key.
    pub async fn get_or_build<T, F, Fut>(
        &self,
        key: CacheKey,
        ttl: Option<Duration>,
        tags: Vec<String>,
        build: F,
    ) -> Result<T>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cache_key = self.resolve_key(&key);
        let start = Instant::now();
        if let Some(value) = self.try_get::<T>(&cache_key).await {
            self.record_hit(&cache_key, start.elapsed()).await;
            return Ok(value);
        }
        let result = build().await?;
        self.record_miss(start.elapsed()).await;
        self.maybe_store(&cache_key, &result, ttl, tags).await;
        Ok(result)
    }

    /// Same contract as `get_or_build`, but serializes concurrent misses
    /// on the same key behind a per-key `Notify` so `build` runs at most
    /// once per outstanding miss. Requires `with_single_flight()`.
    pub async fn get_or_build_single_flight<T, F, Fut>(
        &self,
        key: CacheKey,
        ttl: Option<Duration>,
        tags: Vec<String>,
        build: F,
    ) -> Result<T>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self
            .single_flight
            .as_ref()
            .expect("single-flight not enabled; call with_single_flight() first");
        let cache_key = self.resolve_key(&key);
        let start = Instant::now();

        loop {
            if let Some(value) = self.try_get::<T>(&cache_key).await {
                self.record_hit(&cache_key, start.elapsed()).await;
                return Ok(value);
            }

            let mut inflight = guard.lock().await;
            if let Some(notify) = inflight.get(&cache_key).cloned() {
                drop(inflight);
                notify.notified().await;
                continue;
            }

            let notify = Arc::new(Notify::new());
            inflight.insert(cache_key.clone(), notify.clone());
            drop(inflight);

            let built = build().await;
            guard.lock().await.remove(&cache_key);
            notify.notify_waiters();

            let result = built?;
            self.record_miss(start.elapsed()).await;
            self.maybe_store(&cache_key, &result, ttl, tags).await;
            return Ok(result);
        }
    }

    async fn maybe_store<T: Cacheable>(
        &self,
        cache_key: &str,
        result: &T,
        ttl: Option<Duration>,
        tags: Vec<String>,
    ) {
        let row_count = result.row_count();
        if row_count > self.config.max_cacheable_rows {
            tracing::warn!(
                key = %cache_key,
                row_count,
                max = self.config.max_cacheable_rows,
                "result exceeds max_cacheable_rows, not caching"
            );
            return;
        }
        if row_count > self.config.warn_on_large_result {
            tracing::warn!(
                key = %cache_key,
                row_count,
                warn_at = self.config.warn_on_large_result,
                "caching a large result"
            );
        }

        let requested_ttl = ttl.unwrap_or(Duration::from_secs(self.config.default_ttl));
        let max_ttl = Duration::from_secs(self.config.max_ttl);
        let effective_ttl = if requested_ttl > max_ttl {
            tracing::warn!(
                key = %cache_key,
                requested_secs = requested_ttl.as_secs(),
                max_secs = max_ttl.as_secs(),
                "requested TTL exceeds max_ttl, clamping"
            );
            max_ttl
        } else {
            requested_ttl
        };

        let bytes = match serde_json::to_vec(result) {
            Ok(b) => b,
            Err(err) => {
                tracing::warn!(key = %cache_key, error = %err, "failed to serialize result, not caching");
                return;
            }
        };
        let approximate_size = bytes.len();

        if let Err(err) = self.store.set(cache_key, bytes, Some(effective_ttl)).await {
            tracing::warn!(key = %cache_key, error = %err, "cache set failed");
            return;
        }

        self.metadata.write().await.insert(
            cache_key.to_string(),
            CacheMetadata {
                stored_at: Instant::now(),
                ttl: effective_ttl,
                tags: tags.clone(),
                approximate_size,
                hits: 0,
            },
        );
        if !tags.is_empty() {
            let mut index = self.tag_index.write().await;
            for tag in &tags {
                index.entry(tag.clone()).or_default().insert(cache_key.to_string());
            }
        }
        self.stats.lock().await.sets += 1;
    }

    async fn forget_key(&self, key: &str) {
        let _ = self.store.delete(key).await;
        self.metadata.write().await.remove(key);
        let mut index = self.tag_index.write().await;
        index.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
    }

    /// After this returns, no key with tag `t` remains retrievable and the
    /// tag index has no entry for `t`.
    pub async fn invalidate_by_tag(&self, tag: &str) {
        let keys: Vec<String> = {
            let mut index = self.tag_index.write().await;
            index.remove(tag).map(|s| s.into_iter().collect()).unwrap_or_default()
        };
        let count = keys.len();
        for key in keys {
            let _ = self.store.delete(&key).await;
            self.metadata.write().await.remove(&key);
        }
        if count > 0 {
            self.stats.lock().await.deletes += count as u64;
        }
    }

    pub async fn invalidate_by_pattern(&self, pattern: &str) {
        let keys = self.store.keys(pattern).await.unwrap_or_default();
        for key in &keys {
            self.forget_key(key).await;
        }
        if !keys.is_empty() {
            self.stats.lock().await.deletes += keys.len() as u64;
        }
    }

    /// Best-effort write-triggered invalidation: extracts
    /// table names referenced by `sql` and invalidates both the
    /// `table:<name>` tag and the `*<name>*` pattern for each.
    pub async fn invalidate_for_write(&self, sql: &str) {
        for table in extract_table_names(sql) {
            let (tag_pattern, glob_pattern) = patterns_for_table(&table);
            self.invalidate_by_tag(&tag_pattern).await;
            self.invalidate_by_pattern(&glob_pattern).await;
        }
    }

    pub async fn stats(&self) -> CacheStatsSnapshot {
        self.stats.lock().await.snapshot()
    }

    /// One cleanup pass: drops metadata-tracked entries whose TTL has
    /// elapsed and their tag back-references. Called on an interval by
    /// `spawn_cleanup_task`, or directly by tests/hosts that drive their
    /// own scheduler.
    pub async fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<String> = {
            let metadata = self.metadata.read().await;
            metadata
                .iter()
                .filter(|(_, m)| now.duration_since(m.stored_at) > m.ttl)
                .map(|(k, _)| k.clone())
                .collect()
        };
        if expired.is_empty() {
            return;
        }
        for key in &expired {
            self.forget_key(key).await;
        }
        self.stats.lock().await.evictions += expired.len() as u64;
    }

    /// Spawns a cancellable periodic sweep. Dropping or `.stop()`-ing the
    /// returned handle cancels it.
    pub fn spawn_cleanup_task(self: &Arc<Self>, interval: Duration) -> CleanupHandle {
        let coordinator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                coordinator.sweep_expired().await;
            }
        });
        CleanupHandle { handle: Some(handle) }
    }
}

pub struct CleanupHandle {
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl CleanupHandle {
    pub fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::fake::InMemoryCacheStore;
    use crate::connection::Row;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rows(n: usize) -> Vec<Row> {
        (0..n).map(|_| Row::default()).collect()
    }

    fn coordinator() -> CacheCoordinator {
        CacheCoordinator::new(Arc::new(InMemoryCacheStore::default()), CacheConfig::default())
    }

    #[tokio::test]
    async fn round_trip_set_then_get() {
        let c = coordinator();
        let built = AtomicUsize::new(0);
        let key = CacheKey::Explicit("k1".to_string());
        let first: Vec<Row> = c
            .get_or_build(key, None, vec![], || async {
                built.fetch_add(1, Ordering::SeqCst);
                Ok(rows(3))
            })
            .await
            .unwrap();
        assert_eq!(first.len(), 3);

        let key = CacheKey::Explicit("k1".to_string());
        let second: Vec<Row> = c
            .get_or_build(key, None, vec![], || async {
                built.fetch_add(1, Ordering::SeqCst);
                Ok(rows(3))
            })
            .await
            .unwrap();
        assert_eq!(second.len(), 3);
        assert_eq!(built.load(Ordering::SeqCst), 1, "second call should be a cache hit");

        let stats = c.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn tag_invalidation_removes_every_tagged_key() {
        let c = coordinator();
        c.get_or_build(
            CacheKey::Explicit("a".to_string()),
            None,
            vec!["users".to_string()],
            || async { Ok(rows(1)) },
        )
        .await
        .unwrap();
        c.get_or_build(
            CacheKey::Explicit("b".to_string()),
            None,
            vec!["users".to_string()],
            || async { Ok(rows(1)) },
        )
        .await
        .unwrap();

        c.invalidate_by_tag("users").await;

        assert!(c.try_get::<Vec<Row>>("a").await.is_none());
        assert!(c.try_get::<Vec<Row>>("b").await.is_none());
        assert!(!c.tag_index.read().await.contains_key("users"));
    }

    #[tokio::test]
    async fn oversized_result_is_returned_but_not_cached() {
        let mut config = CacheConfig::default();
        config.max_cacheable_rows = 2;
        let c = CacheCoordinator::new(Arc::new(InMemoryCacheStore::default()), config);
        let built = AtomicUsize::new(0);
        for _ in 0..2 {
            let result: Vec<Row> = c
                .get_or_build(CacheKey::Explicit("big".to_string()), None, vec![], || async {
                    built.fetch_add(1, Ordering::SeqCst);
                    Ok(rows(5))
                })
                .await
                .unwrap();
            assert_eq!(result.len(), 5);
        }
        assert_eq!(built.load(Ordering::SeqCst), 2, "oversized results are never cached");
    }

    #[tokio::test]
    async fn ttl_above_max_is_clamped() {
        let c = coordinator();
        c.get_or_build(
            CacheKey::Explicit("k".to_string()),
            Some(Duration::from_secs(999_999)),
            vec![],
            || async { Ok(rows(1)) },
        )
        .await
        .unwrap();
        let metadata = c.metadata.read().await;
        let entry = metadata.get("k").unwrap();
        assert_eq!(entry.ttl, Duration::from_secs(c.config.max_ttl));
    }

    #[tokio::test]
    async fn single_flight_runs_build_once_for_concurrent_misses() {
        let c = Arc::new(coordinator().with_single_flight());
        let built = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let c = Arc::clone(&c);
            let built = Arc::clone(&built);
            handles.push(tokio::spawn(async move {
                c.get_or_build_single_flight(
                    CacheKey::Explicit("sf".to_string()),
                    None,
                    vec![],
                    || async {
                        built.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(rows(1))
                    },
                )
                .await
                .unwrap()
            }));
        }
        for h in handles {
            let result: Vec<Row> = h.await.unwrap();
            assert_eq!(result.len(), 1);
        }
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sweep_expired_removes_stale_entries() {
        let c = coordinator();
        c.get_or_build(
            CacheKey::Explicit("stale".to_string()),
            Some(Duration::from_millis(1)),
            vec!["t".to_string()],
            || async { Ok(rows(1)) },
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        c.sweep_expired().await;
        assert!(c.try_get::<Vec<Row>>("stale").await.is_none());
        assert!(!c.tag_index.read().await.contains_key("t"));
    }

    #[tokio::test]
    async fn invalidate_for_write_extracts_table_and_clears_it() {
        let c = coordinator();
        c.get_or_build(
            CacheKey::Fingerprint {
                sql: "SELECT * FROM users".to_string(),
                bindings: vec![],
            },
            None,
            vec!["table:users".to_string()],
            || async { Ok(rows(2)) },
        )
        .await
        .unwrap();

        c.invalidate_for_write("UPDATE users SET name = $1 WHERE id = $2").await;

        let result: Vec<Row> = c
            .get_or_build(
                CacheKey::Fingerprint {
                    sql: "SELECT * FROM users".to_string(),
                    bindings: vec![],
                },
                None,
                vec![],
                || async { Ok(rows(9)) },
            )
            .await
            .unwrap();
        assert_eq!(result.len(), 9, "prior cached entry must have been evicted");
    }
}
