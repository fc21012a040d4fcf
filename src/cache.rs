//! Content-addressed cache of AI lookups with single-flight coalescing.
//!
//! Entries are keyed by a [`fingerprint`] of the query and are write-once:
//! the first stored result for a fingerprint wins and is never replaced.
//! Entries never expire; `shelfname cache clear` is the only way to drop
//! them.
//!
//! [`Cache::get_or_fetch`] guarantees at most one external call per
//! fingerprint across concurrent callers. The in-flight map holds a shared
//! [`OnceCell`] per fingerprint; later callers await the first caller's
//! result instead of issuing their own. Failures are handed to the waiters
//! of that flight but are not stored, so a later call retries.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tokio::sync::OnceCell;

use crate::clean::comparable;
use crate::config::CacheConfig;
use crate::db;
use crate::error::{EnhanceError, Error, Result};
use crate::migrate;
use crate::models::{MergedRecord, RawCandidate};

/// Digest identifying one metadata query: the known record fragments plus
/// the file identity (normalized stem). Copies of the same document in other
/// directories or formats share a fingerprint.
pub fn fingerprint(record: &MergedRecord, stem: &str) -> String {
    let year = record.year.map(|y| y.to_string()).unwrap_or_default();
    let parts = [
        record.author.as_deref().map(comparable).unwrap_or_default(),
        record.title.as_deref().map(comparable).unwrap_or_default(),
        year,
        comparable(stem),
    ];
    let mut hasher = Sha256::new();
    for part in &parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub candidate: RawCandidate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    AlreadyPresent,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Result of [`Cache::get_or_fetch`].
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub candidate: RawCandidate,
    /// True when this caller did not trigger the external call.
    pub cached: bool,
}

/// Durable storage behind the cache.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// `Ok(None)` for a miss, including an unreadable entry.
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>>;

    /// Insert unless present. Never overwrites.
    async fn put(&self, entry: &CacheEntry) -> Result<StoreOutcome>;

    async fn stats(&self) -> Result<CacheStats>;

    /// Remove every entry, returning how many were removed.
    async fn clear(&self) -> Result<u64>;
}

// ============ SQLite ============

/// SQLite-backed cache (`ai_cache` table).
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query("SELECT payload, created_at FROM ai_cache WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let payload: String = row.get("payload");
        let created_at: i64 = row.get("created_at");
        match serde_json::from_str::<RawCandidate>(&payload) {
            Ok(candidate) => Ok(Some(CacheEntry {
                fingerprint: fingerprint.to_string(),
                candidate,
                created_at: ts_to_datetime(created_at),
            })),
            Err(e) => {
                tracing::warn!(fingerprint, error = %e, "corrupt cache entry, treating as miss");
                Ok(None)
            }
        }
    }

    async fn put(&self, entry: &CacheEntry) -> Result<StoreOutcome> {
        let payload = serde_json::to_string(&entry.candidate)
            .map_err(|e| Error::Cache(format!("cannot serialize entry: {}", e)))?;
        let result = sqlx::query(
            r#"
            INSERT INTO ai_cache (fingerprint, payload, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(fingerprint) DO NOTHING
            "#,
        )
        .bind(&entry.fingerprint)
        .bind(&payload)
        .bind(entry.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            StoreOutcome::Stored
        } else {
            StoreOutcome::AlreadyPresent
        })
    }

    async fn stats(&self) -> Result<CacheStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n, MIN(created_at) AS oldest, MAX(created_at) AS newest FROM ai_cache",
        )
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.get("n");
        let oldest: Option<i64> = row.get("oldest");
        let newest: Option<i64> = row.get("newest");
        Ok(CacheStats {
            entries: n.max(0) as u64,
            oldest: oldest.map(ts_to_datetime),
            newest: newest.map(ts_to_datetime),
        })
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ai_cache")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ============ Memory ============

/// Process-local cache, used when the durable cache is disabled.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(fingerprint).cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<StoreOutcome> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(&entry.fingerprint) {
            return Ok(StoreOutcome::AlreadyPresent);
        }
        entries.insert(entry.fingerprint.clone(), entry.clone());
        Ok(StoreOutcome::Stored)
    }

    async fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(CacheStats {
            entries: entries.len() as u64,
            oldest: entries.values().map(|e| e.created_at).min(),
            newest: entries.values().map(|e| e.created_at).max(),
        })
    }

    async fn clear(&self) -> Result<u64> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let n = entries.len() as u64;
        entries.clear();
        Ok(n)
    }
}

// ============ Cache ============

type Flight = Arc<OnceCell<std::result::Result<(RawCandidate, bool), EnhanceError>>>;

pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    inflight: Mutex<HashMap<String, Flight>>,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// SQLite at `config.path` when enabled, otherwise process-local memory.
    pub async fn open(config: &CacheConfig) -> Result<Self> {
        if config.enabled {
            let backend = SqliteBackend::open(&config.path).await?;
            tracing::debug!(path = %config.path.display(), "opened AI cache");
            Ok(Self::new(Arc::new(backend)))
        } else {
            Ok(Self::in_memory())
        }
    }

    /// Storage errors are logged and count as a miss.
    pub async fn lookup(&self, fingerprint: &str) -> Option<RawCandidate> {
        match self.backend.get(fingerprint).await {
            Ok(entry) => entry.map(|e| e.candidate),
            Err(e) => {
                tracing::warn!(fingerprint, error = %e, "cache lookup failed");
                None
            }
        }
    }

    pub async fn store(&self, fingerprint: &str, candidate: &RawCandidate) -> Result<StoreOutcome> {
        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            candidate: candidate.clone(),
            created_at: Utc::now(),
        };
        self.backend.put(&entry).await
    }

    /// Return the cached candidate for `fingerprint`, or run `fetch` exactly
    /// once across all concurrent callers and store its result.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        fingerprint: &str,
        fetch: F,
    ) -> std::result::Result<Fetched, EnhanceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<RawCandidate, EnhanceError>>,
    {
        if let Some(candidate) = self.lookup(fingerprint).await {
            return Ok(Fetched {
                candidate,
                cached: true,
            });
        }

        let flight: Flight = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            inflight
                .entry(fingerprint.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let initiated = AtomicBool::new(false);
        let flag = &initiated;
        let outcome = flight
            .get_or_init(move || async move {
                flag.store(true, Ordering::SeqCst);
                // Another flight may have stored a result since our miss.
                if let Some(candidate) = self.lookup(fingerprint).await {
                    return Ok((candidate, true));
                }
                let candidate = fetch().await?;
                match self.store(fingerprint, &candidate).await {
                    Ok(StoreOutcome::Stored) => {
                        tracing::debug!(fingerprint, "cached AI result")
                    }
                    Ok(StoreOutcome::AlreadyPresent) => {}
                    Err(e) => tracing::warn!(fingerprint, error = %e, "cache store failed"),
                }
                Ok((candidate, false))
            })
            .await
            .clone();

        {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            if inflight
                .get(fingerprint)
                .is_some_and(|current| Arc::ptr_eq(current, &flight))
            {
                inflight.remove(fingerprint);
            }
        }

        let (candidate, from_store) = outcome?;
        Ok(Fetched {
            candidate,
            cached: from_store || !initiated.load(Ordering::SeqCst),
        })
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.backend.stats().await
    }

    pub async fn clear(&self) -> Result<u64> {
        self.backend.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn candidate(title: &str) -> RawCandidate {
        RawCandidate {
            source: Source::Ai,
            author: Some("Sandor Dargo".into()),
            title: Some(title.into()),
            year: Some(2023),
            quality: 0.9,
        }
    }

    #[test]
    fn fingerprint_ignores_case_punctuation_and_directory() {
        let a = MergedRecord {
            author: Some("Sandor Dargo".into()),
            title: Some("Daily C++ Interview".into()),
            ..Default::default()
        };
        let b = MergedRecord {
            author: Some("sandor  dargo".into()),
            title: Some("daily c++ interview!".into()),
            confidence: 0.4,
            ..Default::default()
        };
        assert_eq!(fingerprint(&a, "S_or Dargo - Daily"), fingerprint(&b, "s_or dargo - daily"));
        assert_ne!(fingerprint(&a, "one"), fingerprint(&a, "two"));
        assert_eq!(fingerprint(&a, "x").len(), 64);
    }

    #[tokio::test]
    async fn store_is_write_once() {
        let cache = Cache::in_memory();
        assert_eq!(cache.store("f", &candidate("A")).await.unwrap(), StoreOutcome::Stored);
        assert_eq!(
            cache.store("f", &candidate("B")).await.unwrap(),
            StoreOutcome::AlreadyPresent
        );
        assert_eq!(cache.lookup("f").await.unwrap().title.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn round_trip_skips_second_fetch() {
        let cache = Cache::in_memory();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        for _ in 0..3 {
            let fetched = cache
                .get_or_fetch("fp", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(candidate("Daily C++ Interview"))
                })
                .await
                .unwrap();
            assert_eq!(fetched.candidate.title.as_deref(), Some("Daily C++ Interview"));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let cache = Arc::new(Cache::in_memory());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("same", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(candidate("Shared"))
                    })
                    .await
            }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.candidate == results[0].candidate));
        assert_eq!(results.iter().filter(|r| !r.cached).count(), 1);
    }

    #[tokio::test]
    async fn failures_are_shared_but_not_cached() {
        let cache = Cache::in_memory();
        let err = cache
            .get_or_fetch("fp", || async {
                Err(EnhanceError::Communication("timeout".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err, EnhanceError::Communication("timeout".into()));
        assert!(cache.lookup("fp").await.is_none());

        let ok = cache
            .get_or_fetch("fp", || async { Ok(candidate("Retry")) })
            .await
            .unwrap();
        assert!(!ok.cached);
        assert_eq!(ok.candidate.title.as_deref(), Some("Retry"));
    }

    #[tokio::test]
    async fn sqlite_backend_persists_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.sqlite");
        {
            let backend = SqliteBackend::open(&path).await.unwrap();
            let cache = Cache::new(Arc::new(backend));
            cache.store("fp", &candidate("Persisted")).await.unwrap();
        }
        let backend = SqliteBackend::open(&path).await.unwrap();
        let cache = Cache::new(Arc::new(backend));
        assert_eq!(
            cache.lookup("fp").await.unwrap().title.as_deref(),
            Some("Persisted")
        );
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 1);
        assert!(stats.oldest.is_some());
        assert_eq!(cache.clear().await.unwrap(), 1);
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn corrupt_sqlite_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::open(&dir.path().join("cache.sqlite"))
            .await
            .unwrap();
        sqlx::query("INSERT INTO ai_cache (fingerprint, payload, created_at) VALUES ('bad', '{not json', 0)")
            .execute(&backend.pool)
            .await
            .unwrap();
        let cache = Cache::new(Arc::new(backend));
        cache.store("good", &candidate("Fine")).await.unwrap();

        assert!(cache.lookup("bad").await.is_none());
        assert!(cache.lookup("good").await.is_some());
    }
}
