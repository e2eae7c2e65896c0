// ── Registry cache ──
//
// Read-through cache of IP → organization. Successes are kept forever.
// Failures are remembered only for `failure_retention`; after that the
// address is looked up again. A failure is never a permanent "Unknown".

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::store::json;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCacheEntry {
    pub ip: IpAddr,
    /// Organization name for successful lookups.
    #[serde(default)]
    pub organization: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub success: bool,
    /// Why the lookup failed, for failed entries.
    #[serde(default)]
    pub error: Option<String>,
}

impl RegistryCacheEntry {
    pub fn success(ip: IpAddr, organization: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            ip,
            organization: Some(organization.into()),
            checked_at: now,
            success: true,
            error: None,
        }
    }

    pub fn failure(ip: IpAddr, error: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            ip,
            organization: None,
            checked_at: now,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Storage behind the resolver.
pub trait RegistryCache: Send + Sync {
    fn get(&self, ip: IpAddr) -> Option<RegistryCacheEntry>;

    /// Insert or replace. A newer result always replaces an older one.
    fn put(&self, entry: RegistryCacheEntry);

    /// `true` when `entry` must not short-circuit a lookup at `now`.
    fn is_stale(&self, entry: &RegistryCacheEntry, now: DateTime<Utc>) -> bool;

    /// Persist whatever the cache holds. In-memory caches have nothing to do.
    fn flush(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// In-memory cache with optional JSON persistence.
#[derive(Debug)]
pub struct MemoryRegistryCache {
    entries: DashMap<IpAddr, RegistryCacheEntry>,
    failure_retention: Duration,
    path: Option<PathBuf>,
}

impl MemoryRegistryCache {
    pub fn new(failure_retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            failure_retention,
            path: None,
        }
    }

    /// Load entries from `path`; a missing file yields an empty cache.
    /// `flush` writes back to the same file.
    pub fn open(path: &Path, failure_retention: Duration) -> Result<Self, CoreError> {
        let mut cache = Self::new(failure_retention);
        let rows: Vec<RegistryCacheEntry> = json::load_or_default(path)?;
        for row in rows {
            cache.entries.insert(row.ip, row);
        }
        cache.path = Some(path.to_path_buf());
        Ok(cache)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failure_retention(&self) -> Duration {
        self.failure_retention
    }
}

impl RegistryCache for MemoryRegistryCache {
    fn get(&self, ip: IpAddr) -> Option<RegistryCacheEntry> {
        self.entries.get(&ip).map(|e| e.value().clone())
    }

    fn put(&self, entry: RegistryCacheEntry) {
        match self.entries.get_mut(&entry.ip) {
            Some(mut existing) if existing.checked_at > entry.checked_at => {
                // Keep the newer result; only fill a success the old row lacked.
                if entry.success && !existing.success {
                    *existing = entry;
                }
            }
            Some(mut existing) => *existing = entry,
            None => {
                self.entries.insert(entry.ip, entry);
            }
        }
    }

    fn is_stale(&self, entry: &RegistryCacheEntry, now: DateTime<Utc>) -> bool {
        !entry.success && now.signed_duration_since(entry.checked_at) >= self.failure_retention
    }

    fn flush(&self) -> Result<(), CoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut rows: Vec<RegistryCacheEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        rows.sort_by_key(|r| r.ip);
        json::save(path, &rows)
    }
}
