// ── Enriched circuit store ──
//
// One row per site with an optimistic version. A write carries the
// version it read; a mismatch means another writer got there first.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::json;
use crate::error::CoreError;
use crate::model::{EnrichedCircuit, site_key};

/// Persistence for enriched rows.
pub trait EnrichedStore: Send + Sync {
    fn get(&self, site: &str) -> Result<Option<EnrichedCircuit>, CoreError>;

    /// Write `row` if the stored version still equals `row.version`
    /// (0 for a row that does not exist yet). Returns the new version.
    fn put(&self, row: EnrichedCircuit) -> Result<u64, CoreError>;

    fn remove(&self, site: &str) -> Result<bool, CoreError>;

    /// Site names of every stored row.
    fn sites(&self) -> Result<Vec<String>, CoreError>;

    /// Make everything written so far durable.
    fn flush(&self) -> Result<(), CoreError>;
}

/// In-memory table, optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct EnrichedTable {
    rows: DashMap<String, EnrichedCircuit>,
    path: Option<PathBuf>,
    writes: AtomicU64,
}

impl EnrichedTable {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path` (empty when the file is missing); `flush` writes back.
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let rows: Vec<EnrichedCircuit> = json::load_or_default(path)?;
        let table = Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        };
        for row in rows {
            table.rows.insert(site_key(&row.site), row);
        }
        Ok(table)
    }

    /// Successful `put`s since the table was created.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every row, sorted by site.
    pub fn snapshot(&self) -> Vec<EnrichedCircuit> {
        let mut rows: Vec<_> = self.rows.iter().map(|r| r.value().clone()).collect();
        rows.sort_by(|a, b| a.site.cmp(&b.site));
        rows
    }
}

impl EnrichedStore for EnrichedTable {
    fn get(&self, site: &str) -> Result<Option<EnrichedCircuit>, CoreError> {
        Ok(self.rows.get(&site_key(site)).map(|r| r.value().clone()))
    }

    fn put(&self, mut row: EnrichedCircuit) -> Result<u64, CoreError> {
        let key = site_key(&row.site);
        let found = match self.rows.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                let found = slot.get().version;
                if found == row.version {
                    row.version += 1;
                    let version = row.version;
                    slot.insert(row);
                    self.writes.fetch_add(1, Ordering::Relaxed);
                    return Ok(version);
                }
                found
            }
            Entry::Vacant(slot) => {
                if row.version == 0 {
                    row.version = 1;
                    slot.insert(row);
                    self.writes.fetch_add(1, Ordering::Relaxed);
                    return Ok(1);
                }
                0
            }
        };
        Err(CoreError::ConcurrentUpdateConflict {
            key,
            expected: row.version,
            found,
        })
    }

    fn remove(&self, site: &str) -> Result<bool, CoreError> {
        Ok(self.rows.remove(&site_key(site)).is_some())
    }

    fn sites(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.rows.iter().map(|r| r.value().site.clone()).collect())
    }

    fn flush(&self) -> Result<(), CoreError> {
        match &self.path {
            Some(path) => json::save(path, &self.snapshot()),
            None => Ok(()),
        }
    }
}
