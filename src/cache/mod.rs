//! Two-tier response cache.
//!
//! - **Memory tier**: bounded map keyed by query hash, batch-evicted by
//!   least-recent access when full.
//! - **Durable tier**: optional SQLite table mirroring memory writes,
//!   consulted on memory misses and used to repopulate memory.
//!
//! Durable I/O errors are logged and treated as misses; they never fail a
//! consultation.

mod key;

pub use key::{normalize, query_hash};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::provider::ProviderId;
use crate::storage::cache_store::{self, CacheRow};

/// A cached answer for one query hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub query_hash: String,
    pub response: String,
    pub provider: ProviderId,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
    pub hit_count: u32,
}

impl CacheEntry {
    /// A fresh entry created now, with no hits.
    ///
    /// The timestamp is truncated to milliseconds, the precision persisted
    /// by the durable tier.
    pub fn new(
        query_hash: impl Into<String>,
        response: impl Into<String>,
        provider: ProviderId,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            query_hash: query_hash.into(),
            response: response.into(),
            provider,
            model_id: model_id.into(),
            created_at: Utc::now().trunc_subsecs(3),
            hit_count: 0,
        }
    }

    /// Whether the entry has reached `ttl` at time `now`.
    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at >= ttl
    }

    fn to_row(&self) -> CacheRow {
        CacheRow {
            query_hash: self.query_hash.clone(),
            response: self.response.clone(),
            provider: self.provider.as_str().to_string(),
            model_id: self.model_id.clone(),
            created_at: format_timestamp(self.created_at),
            hit_count: i64::from(self.hit_count),
        }
    }
}

impl TryFrom<CacheRow> for CacheEntry {
    type Error = String;

    fn try_from(row: CacheRow) -> Result<Self, Self::Error> {
        let provider = row.provider.parse::<ProviderId>().map_err(|e| e.to_string())?;
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| format!("invalid created_at '{}': {}", row.created_at, e))?
            .with_timezone(&Utc);

        Ok(Self {
            query_hash: row.query_hash,
            response: row.response,
            provider,
            model_id: row.model_id,
            created_at,
            hit_count: u32::try_from(row.hit_count.max(0)).unwrap_or(u32::MAX),
        })
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Counts removed by one expiry sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub memory: usize,
    pub durable: u64,
}

struct Slot {
    entry: CacheEntry,
    last_access: u64,
}

/// Memory tier with access-order bookkeeping. Guarded by one mutex.
#[derive(Default)]
struct MemoryTier {
    slots: HashMap<String, Slot>,
    clock: u64,
}

enum MemoryLookup {
    Hit(CacheEntry),
    Expired,
    Miss,
}

impl MemoryTier {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn lookup(&mut self, hash: &str, ttl: chrono::Duration, now: DateTime<Utc>) -> MemoryLookup {
        let tick = self.tick();
        let Some(slot) = self.slots.get_mut(hash) else {
            return MemoryLookup::Miss;
        };

        if slot.entry.is_expired(ttl, now) {
            self.slots.remove(hash);
            return MemoryLookup::Expired;
        }

        slot.entry.hit_count = slot.entry.hit_count.saturating_add(1);
        slot.last_access = tick;
        MemoryLookup::Hit(slot.entry.clone())
    }

    /// Insert, evicting first if a new key would exceed `max_entries`.
    fn insert(&mut self, entry: CacheEntry, max_entries: usize) -> usize {
        let evicted = if !self.slots.contains_key(&entry.query_hash)
            && self.slots.len() >= max_entries
        {
            self.evict_least_recent()
        } else {
            0
        };

        let tick = self.tick();
        self.slots.insert(
            entry.query_hash.clone(),
            Slot {
                entry,
                last_access: tick,
            },
        );
        evicted
    }

    /// Drop the least recently accessed ~10% of entries (at least one).
    fn evict_least_recent(&mut self) -> usize {
        let mut order: Vec<(u64, String)> = self
            .slots
            .iter()
            .map(|(k, s)| (s.last_access, k.clone()))
            .collect();
        order.sort_unstable();

        let count = (self.slots.len() / 10).max(1);
        for (_, key) in order.into_iter().take(count) {
            self.slots.remove(&key);
        }
        count
    }

    fn remove_expired(&mut self, ttl: chrono::Duration, now: DateTime<Utc>) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, s| !s.entry.is_expired(ttl, now));
        before - self.slots.len()
    }
}

/// Content-addressed, TTL-bound, size-bound response cache.
pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    memory: Mutex<MemoryTier>,
    store: Option<SqlitePool>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize, store: Option<SqlitePool>) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            memory: Mutex::new(MemoryTier::default()),
            store,
        }
    }

    pub fn from_config(config: &CacheConfig, store: Option<SqlitePool>) -> Self {
        Self::new(config.ttl(), config.max_entries, store)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn has_durable_tier(&self) -> bool {
        self.store.is_some()
    }

    /// Number of entries currently held in memory.
    pub fn len(&self) -> usize {
        self.memory.lock().unwrap().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn chrono_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX)
    }

    /// Look up the answer cached for `query` + `context`.
    pub async fn get(&self, query: &str, context: &str) -> Option<CacheEntry> {
        self.get_by_hash(&query_hash(query, context)).await
    }

    /// Look up by precomputed query hash.
    ///
    /// A hit increments the entry's hit counter and refreshes its recency.
    /// An expired entry is removed from both tiers and reported as a miss.
    pub async fn get_by_hash(&self, hash: &str) -> Option<CacheEntry> {
        let ttl = self.chrono_ttl();
        let now = Utc::now();

        let lookup = self.memory.lock().unwrap().lookup(hash, ttl, now);
        match lookup {
            MemoryLookup::Hit(entry) => {
                if let Some(pool) = &self.store {
                    cache_store::spawn_hit_count_update(pool, hash.to_string());
                }
                return Some(entry);
            }
            MemoryLookup::Expired => {
                tracing::debug!(query_hash = %hash, "Cache entry expired");
                self.delete_durable(hash).await;
                return None;
            }
            MemoryLookup::Miss => {}
        }

        let pool = self.store.as_ref()?;
        let row = match cache_store::fetch(pool, hash).await {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(query_hash = %hash, error = %e, "Durable cache read failed");
                return None;
            }
        };

        let mut entry = match CacheEntry::try_from(row) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(query_hash = %hash, error = %e, "Discarding unreadable cache row");
                self.delete_durable(hash).await;
                return None;
            }
        };

        if entry.is_expired(ttl, now) {
            self.delete_durable(hash).await;
            return None;
        }

        entry.hit_count = entry.hit_count.saturating_add(1);
        if let Err(e) = cache_store::increment_hit_count(pool, hash).await {
            tracing::warn!(query_hash = %hash, error = %e, "Failed to update cache hit count");
        }

        self.insert_memory(entry.clone());
        tracing::debug!(query_hash = %hash, "Promoted durable cache entry into memory");
        Some(entry)
    }

    /// Cache `entry` as the answer for `query` + `context`.
    pub async fn set(&self, query: &str, context: &str, mut entry: CacheEntry) {
        entry.query_hash = query_hash(query, context);
        self.insert(entry).await;
    }

    /// Write-through insert keyed by `entry.query_hash`.
    pub async fn insert(&self, entry: CacheEntry) {
        let row = self.store.as_ref().map(|_| entry.to_row());
        self.insert_memory(entry);

        if let (Some(pool), Some(row)) = (&self.store, row) {
            if let Err(e) = row.upsert(pool).await {
                tracing::warn!(
                    query_hash = %row.query_hash,
                    error = %e,
                    "Durable cache write failed"
                );
            }
        }
    }

    fn insert_memory(&self, entry: CacheEntry) {
        let evicted = self.memory.lock().unwrap().insert(entry, self.max_entries);
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted least recently used cache entries");
        }
    }

    async fn delete_durable(&self, hash: &str) {
        if let Some(pool) = &self.store {
            if let Err(e) = cache_store::delete(pool, hash).await {
                tracing::warn!(query_hash = %hash, error = %e, "Durable cache delete failed");
            }
        }
    }

    /// Remove every entry older than the TTL from both tiers.
    pub async fn clear_expired(&self) -> SweepReport {
        let ttl = self.chrono_ttl();
        let now = Utc::now();

        let memory = self.memory.lock().unwrap().remove_expired(ttl, now);

        // A TTL reaching past the earliest representable time expires nothing.
        let cutoff = now.checked_sub_signed(ttl);
        let durable = match (&self.store, cutoff) {
            (Some(pool), Some(cutoff)) => {
                let cutoff = format_timestamp(cutoff);
                match cache_store::delete_created_before(pool, &cutoff).await {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(error = %e, "Durable cache sweep failed");
                        0
                    }
                }
            }
            _ => 0,
        };

        SweepReport { memory, durable }
    }
}
