//! Content-addressed embedding cache with TTL expiry and LRU eviction.
//!
//! All reads and writes go through a single `tokio::sync::Mutex` around the
//! `LruCache`, so a `get` that promotes an entry and a `set` that evicts one
//! can never interleave. Expiry is measured with `tokio::time::Instant`.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::errors::{ServiceError, ServiceResult};

/// Cache key derived from normalized text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// SHA-256 of the normalized text, hex encoded
    pub fn of(normalized_text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalized_text.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache entry with access metadata
#[derive(Debug, Clone)]
struct CacheEntry {
    embedding: Vec<f32>,
    #[allow(dead_code)]
    inserted_at: Instant,
    #[allow(dead_code)]
    last_access_at: Instant,
    /// `None` when the TTL is too large to represent
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(embedding: Vec<f32>, now: Instant, ttl: Duration) -> Self {
        Self {
            embedding,
            inserted_at: now,
            last_access_at: now,
            expires_at: now.checked_add(ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |expires_at| now > expires_at)
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: u64,
    misses: u64,
    insertions: u64,
    evictions: u64,
    expirations: u64,
}

struct CacheState {
    entries: LruCache<Fingerprint, CacheEntry>,
    counters: CacheCounters,
}

/// Cache hit/miss statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
    pub capacity: usize,
    /// Cache hit rate (0.0 to 1.0)
    pub hit_rate: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    fingerprint: Fingerprint,
    embedding: Vec<f32>,
    expires_at_unix_ms: Option<u64>,
}

/// On-disk snapshot, entries ordered least recently used first
#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    saved_at_unix_ms: u64,
    entries: Vec<PersistedEntry>,
}

fn unix_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
}

/// Bounded LRU cache with TTL for embeddings
pub struct EmbeddingCache {
    state: Mutex<CacheState>,
    ttl: Duration,
    capacity: NonZeroUsize,
}

impl EmbeddingCache {
    /// Create a cache holding at most `max_size` entries for `ttl` each
    pub fn new(max_size: usize, ttl: Duration) -> ServiceResult<Self> {
        let capacity = NonZeroUsize::new(max_size)
            .ok_or_else(|| ServiceError::config("cache.max_size must be greater than zero"))?;

        Ok(Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                counters: CacheCounters::default(),
            }),
            ttl,
            capacity,
        })
    }

    pub fn with_config(config: &CacheConfig) -> ServiceResult<Self> {
        Self::new(config.max_size, config.ttl())
    }

    /// Look up an unexpired embedding; expired entries are removed on the spot
    pub async fn get(&self, key: &Fingerprint) -> Option<Vec<f32>> {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let lookup = state.entries.get_mut(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                entry.last_access_at = now;
                Some(entry.embedding.clone())
            }
        });

        match lookup {
            Some(Some(embedding)) => {
                state.counters.hits += 1;
                log::debug!("✅ Cache HIT for {}", key);
                Some(embedding)
            }
            Some(None) => {
                state.entries.pop(key);
                state.counters.expirations += 1;
                state.counters.misses += 1;
                log::debug!("⌛ Cache entry {} expired", key);
                None
            }
            None => {
                state.counters.misses += 1;
                log::debug!("❌ Cache MISS for {}", key);
                None
            }
        }
    }

    /// Store an embedding, evicting the least recently used entry when full
    pub async fn set(&self, key: Fingerprint, embedding: Vec<f32>) {
        let entry = CacheEntry::new(embedding, Instant::now(), self.ttl);

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if let Some((evicted, _)) = state.entries.push(key.clone(), entry) {
            if evicted != key {
                state.counters.evictions += 1;
                log::debug!("🗑️ Evicted least recently used cache entry {}", evicted);
            }
        }
        state.counters.insertions += 1;
    }

    /// Whether an unexpired entry exists, without touching LRU order
    pub async fn contains(&self, key: &Fingerprint) -> bool {
        let now = Instant::now();
        let state = self.state.lock().await;
        state
            .entries
            .peek(key)
            .map_or(false, |entry| !entry.is_expired(now))
    }

    /// Remove expired entries from cache
    pub async fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let expired_keys: Vec<Fingerprint> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            state.entries.pop(key);
        }

        let expired_count = expired_keys.len();
        state.counters.expirations += expired_count as u64;
        if expired_count > 0 {
            log::info!("🧹 Cleaned up {} expired cache entries", expired_count);
        }
        expired_count
    }

    /// Number of entries, expired ones included until they are swept
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Clear all entries and counters
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.counters = CacheCounters::default();
        log::info!("🗑️ Cache cleared");
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        let counters = &state.counters;
        let lookups = counters.hits + counters.misses;

        CacheStats {
            hits: counters.hits,
            misses: counters.misses,
            insertions: counters.insertions,
            evictions: counters.evictions,
            expirations: counters.expirations,
            entries: state.entries.len(),
            capacity: self.capacity.get(),
            hit_rate: if lookups > 0 {
                counters.hits as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }

    /// Write unexpired entries to a JSON snapshot, returning how many were saved
    pub async fn save_to_disk(&self, path: &Path) -> ServiceResult<usize> {
        let snapshot = {
            let now = Instant::now();
            let unix_now = unix_now();
            let state = self.state.lock().await;

            // `iter` walks most recent first; store least recent first so a
            // reload reproduces the same LRU order.
            let entries: Vec<PersistedEntry> = state
                .entries
                .iter()
                .rev()
                .filter(|(_, entry)| !entry.is_expired(now))
                .map(|(key, entry)| PersistedEntry {
                    fingerprint: key.clone(),
                    embedding: entry.embedding.clone(),
                    expires_at_unix_ms: entry.expires_at.map(|expires_at| {
                        (unix_now + expires_at.saturating_duration_since(now)).as_millis() as u64
                    }),
                })
                .collect();

            CacheSnapshot {
                saved_at_unix_ms: unix_now.as_millis() as u64,
                entries,
            }
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ServiceError::internal(format!("failed to create '{}': {}", parent.display(), e))
                })?;
            }
        }

        let json = serde_json::to_vec(&snapshot)
            .map_err(|e| ServiceError::internal(format!("failed to serialize cache: {}", e)))?;
        tokio::fs::write(path, json).await.map_err(|e| {
            ServiceError::internal(format!("failed to write '{}': {}", path.display(), e))
        })?;

        let saved = snapshot.entries.len();
        log::info!("💾 Persisted {} cache entries to {}", saved, path.display());
        Ok(saved)
    }

    /// Restore entries from a snapshot, skipping those already expired
    pub async fn load_from_disk(&self, path: &Path) -> ServiceResult<usize> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(ServiceError::internal(format!(
                    "failed to read '{}': {}",
                    path.display(),
                    e
                )))
            }
        };

        let snapshot: CacheSnapshot = serde_json::from_slice(&bytes).map_err(|e| {
            ServiceError::internal(format!("corrupt cache snapshot '{}': {}", path.display(), e))
        })?;

        let now = Instant::now();
        let unix_now_ms = unix_now().as_millis() as u64;
        let mut loaded = 0;

        let mut state = self.state.lock().await;
        for persisted in snapshot.entries {
            let remaining = match persisted.expires_at_unix_ms {
                Some(expires_at_ms) if expires_at_ms <= unix_now_ms => continue,
                Some(expires_at_ms) => Duration::from_millis(expires_at_ms - unix_now_ms),
                None => self.ttl,
            };
            state.entries.push(
                persisted.fingerprint,
                CacheEntry::new(persisted.embedding, now, remaining),
            );
            loaded += 1;
        }

        log::info!("📂 Loaded {} cache entries from {}", loaded, path.display());
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(text: &str) -> Fingerprint {
        Fingerprint::of(text)
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Fingerprint::of("hello world");
        let b = Fingerprint::of("hello world");
        let c = Fingerprint::of("hello there");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            EmbeddingCache::new(0, Duration::from_secs(1)),
            Err(ServiceError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_cache_set_and_get() {
        let cache = EmbeddingCache::new(10, Duration::from_secs(60)).unwrap();
        let embedding = vec![0.1, 0.2, 0.3, 0.4];

        assert!(cache.get(&key("test text")).await.is_none());

        cache.set(key("test text"), embedding.clone()).await;

        assert_eq!(cache.get(&key("test text")).await, Some(embedding));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_removes_least_recently_accessed() {
        let cache = EmbeddingCache::new(2, Duration::from_secs(60)).unwrap();

        cache.set(key("a"), vec![1.0]).await;
        cache.set(key("b"), vec![2.0]).await;
        // Touch "a" so "b" becomes least recently used
        assert!(cache.get(&key("a")).await.is_some());
        cache.set(key("c"), vec![3.0]).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.contains(&key("a")).await);
        assert!(!cache.contains(&key("b")).await);
        assert!(cache.contains(&key("c")).await);
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_size_never_exceeds_capacity() {
        let cache = EmbeddingCache::new(5, Duration::from_secs(60)).unwrap();
        for i in 0..50 {
            cache.set(key(&format!("text {}", i)), vec![i as f32]).await;
            assert!(cache.len().await <= 5);
        }
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 5);
        assert_eq!(stats.evictions, 45);
    }

    #[tokio::test]
    async fn test_overwrite_same_key_is_not_eviction() {
        let cache = EmbeddingCache::new(1, Duration::from_secs(60)).unwrap();
        cache.set(key("a"), vec![1.0]).await;
        cache.set(key("a"), vec![2.0]).await;

        assert_eq!(cache.get(&key("a")).await, Some(vec![2.0]));
        assert_eq!(cache.stats().await.evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expiration() {
        let cache = EmbeddingCache::new(10, Duration::from_secs(1)).unwrap();
        cache.set(key("test text"), vec![0.1, 0.2, 0.3]).await;

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(cache.get(&key("test text")).await.is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get(&key("test text")).await.is_none());
        assert_eq!(cache.len().await, 0);

        let stats = cache.stats().await;
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_expired() {
        let cache = EmbeddingCache::new(10, Duration::from_secs(5)).unwrap();
        cache.set(key("old"), vec![1.0]).await;
        tokio::time::advance(Duration::from_secs(3)).await;
        cache.set(key("new"), vec![2.0]).await;
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(cache.remove_expired().await, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.contains(&key("new")).await);
    }

    #[tokio::test]
    async fn test_cache_metrics() {
        let cache = EmbeddingCache::new(10, Duration::from_secs(60)).unwrap();

        let _ = cache.get(&key("test")).await;
        cache.set(key("test"), vec![0.1, 0.2]).await;
        let _ = cache.get(&key("test")).await;

        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.insertions, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_cache_clear() {
        let cache = EmbeddingCache::new(10, Duration::from_secs(60)).unwrap();
        cache.set(key("test1"), vec![0.1]).await;
        cache.set(key("test2"), vec![0.2]).await;
        assert_eq!(cache.len().await, 2);

        cache.clear().await;
        assert!(cache.is_empty().await);
        assert!(cache.get(&key("test1")).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_sets_respect_capacity() {
        let cache = std::sync::Arc::new(EmbeddingCache::new(8, Duration::from_secs(60)).unwrap());
        let mut handles = Vec::new();
        for task in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    cache.set(key(&format!("{}-{}", task, i)), vec![i as f32]).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 8);
        assert_eq!(stats.insertions, 200);
        assert_eq!(stats.evictions, 192);
    }

    #[tokio::test]
    async fn test_persistence_round_trip_keeps_lru_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache").join("snapshot.json");

        let cache = EmbeddingCache::new(3, Duration::from_secs(60)).unwrap();
        cache.set(key("a"), vec![1.0]).await;
        cache.set(key("b"), vec![2.0]).await;
        cache.set(key("c"), vec![3.0]).await;
        let _ = cache.get(&key("a")).await;

        assert_eq!(cache.save_to_disk(&path).await.unwrap(), 3);

        let restored = EmbeddingCache::new(3, Duration::from_secs(60)).unwrap();
        assert_eq!(restored.load_from_disk(&path).await.unwrap(), 3);
        assert_eq!(restored.get(&key("c")).await, Some(vec![3.0]));

        // "b" is least recently used after the reload as well
        restored.set(key("d"), vec![4.0]).await;
        assert!(!restored.contains(&key("b")).await);
        assert!(restored.contains(&key("a")).await);
    }

    #[tokio::test]
    async fn test_load_missing_snapshot_is_empty() {
        let dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::new(3, Duration::from_secs(60)).unwrap();
        assert_eq!(cache.load_from_disk(&dir.path().join("absent.json")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_load_skips_expired_snapshot_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");
        let snapshot = CacheSnapshot {
            saved_at_unix_ms: 0,
            entries: vec![
                PersistedEntry {
                    fingerprint: key("stale"),
                    embedding: vec![1.0],
                    expires_at_unix_ms: Some(1),
                },
                PersistedEntry {
                    fingerprint: key("fresh"),
                    embedding: vec![2.0],
                    expires_at_unix_ms: Some(unix_now().as_millis() as u64 + 60_000),
                },
            ],
        };
        std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        let cache = EmbeddingCache::new(3, Duration::from_secs(60)).unwrap();
        assert_eq!(cache.load_from_disk(&path).await.unwrap(), 1);
        assert!(cache.contains(&key("fresh")).await);
        assert!(!cache.contains(&key("stale")).await);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, b"not json").unwrap();

        let cache = EmbeddingCache::new(3, Duration::from_secs(60)).unwrap();
        assert!(matches!(
            cache.load_from_disk(&path).await,
            Err(ServiceError::Internal { .. })
        ));
    }
}
