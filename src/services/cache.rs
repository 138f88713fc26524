//! Two-tier cache for API responses
//!
//! Composes a fast in-process tier with a durable on-disk tier. Reads check
//! the fast tier first and repopulate it from the durable tier on a hit;
//! writes go to both tiers, and a single tier being unavailable degrades the
//! operation instead of failing it. A global enabled flag makes the whole
//! store inert without callers having to care.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Namespace prefix on every key this store owns, so a shared backing
/// directory can't collide with unrelated cached data.
pub const CACHE_PREFIX: &str = "pbs_schedule_";

/// Group identifier for bulk invalidation.
pub const CACHE_GROUP: &str = "pbs_schedule_viewer";

/// One cached value with its expiry instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(value: Value, ttl_seconds: u64) -> Self {
        Self {
            value,
            expires_at: Utc::now() + Duration::seconds(ttl_seconds as i64),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// A single storage tier.
///
/// Tiers store entries under a group so the whole group can be dropped
/// without enumerating keys.
#[async_trait]
pub trait CacheTier: Send + Sync {
    async fn get(&self, group: &str, key: &str) -> anyhow::Result<Option<CacheEntry>>;
    async fn set(&self, group: &str, key: &str, entry: CacheEntry) -> anyhow::Result<()>;
    async fn delete(&self, group: &str, key: &str) -> anyhow::Result<()>;
    async fn clear_group(&self, group: &str) -> anyhow::Result<()>;
    async fn item_count(&self, group: &str) -> anyhow::Result<usize>;
}

/// In-process tier backed by a HashMap. Expired entries are dropped lazily
/// on read.
#[derive(Default)]
pub struct MemoryTier {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    fn composite_key(group: &str, key: &str) -> String {
        format!("{group}:{key}")
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    async fn get(&self, group: &str, key: &str) -> anyhow::Result<Option<CacheEntry>> {
        let composite = Self::composite_key(group, key);

        let expired = {
            let entries = self.entries.read();
            match entries.get(&composite) {
                Some(entry) if entry.is_expired() => true,
                Some(entry) => return Ok(Some(entry.clone())),
                None => return Ok(None),
            }
        };

        if expired {
            self.entries.write().remove(&composite);
        }
        Ok(None)
    }

    async fn set(&self, group: &str, key: &str, entry: CacheEntry) -> anyhow::Result<()> {
        self.entries
            .write()
            .insert(Self::composite_key(group, key), entry);
        Ok(())
    }

    async fn delete(&self, group: &str, key: &str) -> anyhow::Result<()> {
        self.entries.write().remove(&Self::composite_key(group, key));
        Ok(())
    }

    async fn clear_group(&self, group: &str) -> anyhow::Result<()> {
        let prefix = format!("{group}:");
        self.entries.write().retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    async fn item_count(&self, group: &str) -> anyhow::Result<usize> {
        let prefix = format!("{group}:");
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .filter(|(k, e)| k.starts_with(&prefix) && !e.is_expired())
            .count())
    }
}

/// Durable tier: one JSON envelope per key under `<root>/<group>/`.
pub struct FileTier {
    root: PathBuf,
}

impl FileTier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, group: &str, key: &str) -> PathBuf {
        self.root
            .join(sanitize_filename::sanitize(group))
            .join(format!("{}.json", sanitize_filename::sanitize(key)))
    }
}

#[async_trait]
impl CacheTier for FileTier {
    async fn get(&self, group: &str, key: &str) -> anyhow::Result<Option<CacheEntry>> {
        let path = self.entry_path(group, key);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                // Unreadable envelope is as good as a miss; drop it.
                warn!(path = %path.display(), error = %e, "Discarding corrupt cache file");
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        if entry.is_expired() {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }

        Ok(Some(entry))
    }

    async fn set(&self, group: &str, key: &str, entry: CacheEntry) -> anyhow::Result<()> {
        let path = self.entry_path(group, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serde_json::to_vec(&entry)?).await?;
        Ok(())
    }

    async fn delete(&self, group: &str, key: &str) -> anyhow::Result<()> {
        match tokio::fs::remove_file(self.entry_path(group, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear_group(&self, group: &str) -> anyhow::Result<()> {
        let dir = self.root.join(sanitize_filename::sanitize(group));
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn item_count(&self, group: &str) -> anyhow::Result<usize> {
        let dir = self.root.join(sanitize_filename::sanitize(group));
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        while let Some(dirent) = reader.next_entry().await? {
            let bytes = match tokio::fs::read(dirent.path()).await {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) if !entry.is_expired() => count += 1,
                _ => {}
            }
        }
        Ok(count)
    }
}

/// Cache statistics surfaced to the admin layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub item_count: usize,
    pub enabled: bool,
}

/// The composed two-tier store.
pub struct CacheStore {
    fast: Arc<dyn CacheTier>,
    durable: Option<Arc<dyn CacheTier>>,
    enabled: AtomicBool,
    schedule_ttl: u64,
    ondemand_ttl: u64,
}

impl CacheStore {
    pub fn new(
        fast: Arc<dyn CacheTier>,
        durable: Option<Arc<dyn CacheTier>>,
        enabled: bool,
    ) -> Self {
        Self {
            fast,
            durable,
            enabled: AtomicBool::new(enabled),
            schedule_ttl: 900,
            ondemand_ttl: 3600,
        }
    }

    /// Standard composition: in-process map over a file-backed durable tier
    /// rooted at `cache_path`.
    pub fn with_dir(cache_path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self::new(
            Arc::new(MemoryTier::new()),
            Some(Arc::new(FileTier::new(cache_path))),
            enabled,
        )
    }

    /// Memory-only store, mainly for tests and cache-light embedding.
    pub fn in_memory(enabled: bool) -> Self {
        Self::new(Arc::new(MemoryTier::new()), None, enabled)
    }

    /// Override the schedule/on-demand TTLs (seconds).
    pub fn with_ttls(mut self, schedule_ttl: u64, ondemand_ttl: u64) -> Self {
        self.schedule_ttl = schedule_ttl;
        self.ondemand_ttl = ondemand_ttl;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn schedule_ttl(&self) -> u64 {
        self.schedule_ttl
    }

    pub fn ondemand_ttl(&self) -> u64 {
        self.ondemand_ttl
    }

    /// Get a cached value. Checks the fast tier, then the durable tier; a
    /// durable hit repopulates the fast tier before returning. Tier failures
    /// and deserialization mismatches count as misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.is_enabled() {
            return None;
        }

        let full_key = format!("{CACHE_PREFIX}{key}");

        match self.fast.get(CACHE_GROUP, &full_key).await {
            Ok(Some(entry)) => return decode(key, entry.value),
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Fast cache tier read failed"),
        }

        let durable = self.durable.as_ref()?;
        match durable.get(CACHE_GROUP, &full_key).await {
            Ok(Some(entry)) => {
                // Write-through on read so the next lookup stays in-process.
                if let Err(e) = self.fast.set(CACHE_GROUP, &full_key, entry.clone()).await {
                    warn!(key = %key, error = %e, "Failed to repopulate fast cache tier");
                }
                decode(key, entry.value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Durable cache tier read failed");
                None
            }
        }
    }

    /// Store a value in both tiers with the given TTL. A tier failing is
    /// logged and otherwise ignored; with caching disabled this is a no-op.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) {
        if !self.is_enabled() {
            return;
        }

        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Refusing to cache unserializable value");
                return;
            }
        };

        let full_key = format!("{CACHE_PREFIX}{key}");
        let entry = CacheEntry::new(value, ttl_seconds);

        if let Err(e) = self.fast.set(CACHE_GROUP, &full_key, entry.clone()).await {
            warn!(key = %key, error = %e, "Fast cache tier write failed");
        }
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.set(CACHE_GROUP, &full_key, entry).await {
                warn!(key = %key, error = %e, "Durable cache tier write failed");
            }
        }

        debug!(key = %key, ttl = ttl_seconds, "Cached value");
    }

    /// Remove one key from both tiers.
    pub async fn delete(&self, key: &str) {
        let full_key = format!("{CACHE_PREFIX}{key}");

        if let Err(e) = self.fast.delete(CACHE_GROUP, &full_key).await {
            warn!(key = %key, error = %e, "Fast cache tier delete failed");
        }
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.delete(CACHE_GROUP, &full_key).await {
                warn!(key = %key, error = %e, "Durable cache tier delete failed");
            }
        }
    }

    /// Drop everything this store has ever written, in both tiers, without
    /// enumerating keys.
    pub async fn clear_all(&self) {
        if let Err(e) = self.fast.clear_group(CACHE_GROUP).await {
            warn!(error = %e, "Fast cache tier clear failed");
        }
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.clear_group(CACHE_GROUP).await {
                warn!(error = %e, "Durable cache tier clear failed");
            }
        }
    }

    /// Item count (durable tier when present) and enabled flag.
    pub async fn stats(&self) -> CacheStats {
        let tier: &Arc<dyn CacheTier> = self.durable.as_ref().unwrap_or(&self.fast);
        let item_count = match tier.item_count(CACHE_GROUP).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Cache tier count failed");
                0
            }
        };
        CacheStats {
            item_count,
            enabled: self.is_enabled(),
        }
    }

    // Typed helpers for the two value families the core caches.

    fn schedule_key(callsign: &str, date: &str, feed: &str) -> String {
        format!("schedule_{callsign}_{date}_{feed}")
    }

    pub async fn get_schedule<T: DeserializeOwned>(
        &self,
        callsign: &str,
        date: &str,
        feed: &str,
    ) -> Option<T> {
        self.get(&Self::schedule_key(callsign, date, feed)).await
    }

    pub async fn set_schedule<T: Serialize>(
        &self,
        callsign: &str,
        date: &str,
        feed: &str,
        data: &T,
    ) {
        self.set(&Self::schedule_key(callsign, date, feed), data, self.schedule_ttl)
            .await;
    }

    pub async fn clear_schedule(&self, callsign: &str, date: &str, feed: &str) {
        self.delete(&Self::schedule_key(callsign, date, feed)).await;
    }

    pub async fn get_ondemand<T: DeserializeOwned>(&self, show_id: &str) -> Option<T> {
        self.get(&format!("ondemand_{show_id}")).await
    }

    pub async fn set_ondemand<T: Serialize>(&self, show_id: &str, data: &T) {
        self.set(&format!("ondemand_{show_id}"), data, self.ondemand_ttl)
            .await;
    }

    pub async fn clear_ondemand(&self, show_id: &str) {
        self.delete(&format!("ondemand_{show_id}")).await;
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(key = %key, error = %e, "Cached value failed to deserialize, treating as miss");
            None
        }
    }
}
