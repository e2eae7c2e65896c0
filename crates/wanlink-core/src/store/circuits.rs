// ── Authoritative circuit store ──
//
// Rows grouped by site. Extract rows are replaced wholesale by each
// import; manual rows survive every import and beat any extract row with
// the same identity; enriched-sync rows belong to the post-run sync.

use std::path::{Path, PathBuf};

use dashmap::DashMap;

use super::json;
use crate::error::CoreError;
use crate::model::{CircuitRecord, CircuitRole, RecordSource, site_key};

/// Counts from one extract import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub imported: usize,
    pub replaced: usize,
    /// Extract rows dropped because a manual override owns the circuit.
    pub shadowed_by_manual: usize,
    pub manual_kept: usize,
}

#[derive(Debug, Default)]
pub struct CircuitTable {
    by_site: DashMap<String, Vec<CircuitRecord>>,
    path: Option<PathBuf>,
}

impl CircuitTable {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let rows: Vec<CircuitRecord> = json::load_or_default(path)?;
        let table = Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        };
        for row in rows {
            table.insert(row);
        }
        Ok(table)
    }

    fn insert(&self, row: CircuitRecord) {
        self.by_site.entry(site_key(&row.site)).or_default().push(row);
    }

    /// Every record at `site`.
    pub fn for_site(&self, site: &str) -> Vec<CircuitRecord> {
        self.by_site
            .get(&site_key(site))
            .map(|rows| rows.value().clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_site.iter().map(|rows| rows.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record, ordered by site then role.
    pub fn snapshot(&self) -> Vec<CircuitRecord> {
        let mut rows: Vec<_> = self
            .by_site
            .iter()
            .flat_map(|rows| rows.value().clone())
            .collect();
        rows.sort_by(|a, b| {
            site_key(&a.site)
                .cmp(&site_key(&b.site))
                .then_with(|| a.role.to_string().cmp(&b.role.to_string()))
                .then_with(|| a.record_number.cmp(&b.record_number))
        });
        rows
    }

    /// Replace every extract-sourced row with `records`.
    pub fn replace_extract(&self, records: Vec<CircuitRecord>) -> ImportStats {
        let mut stats = ImportStats::default();

        self.by_site.retain(|_, rows| {
            let before = rows.len();
            rows.retain(|r| r.source != RecordSource::Extract);
            stats.replaced += before - rows.len();
            stats.manual_kept += rows.iter().filter(|r| r.source == RecordSource::Manual).count();
            !rows.is_empty()
        });

        for mut record in records {
            record.source = RecordSource::Extract;
            let identity = record.identity();
            let shadowed = self.by_site.get(&site_key(&record.site)).is_some_and(|rows| {
                rows.iter()
                    .any(|r| r.source == RecordSource::Manual && r.identity() == identity)
            });
            if shadowed {
                stats.shadowed_by_manual += 1;
                continue;
            }
            self.insert(record);
            stats.imported += 1;
        }
        stats
    }

    /// `true` when an extract row with `role` exists at `site`.
    pub fn has_extract_role(&self, site: &str, role: &CircuitRole) -> bool {
        self.by_site.get(&site_key(site)).is_some_and(|rows| {
            rows.iter()
                .any(|r| r.source == RecordSource::Extract && &r.role == role)
        })
    }

    /// Insert or update the enriched-sync row for (`site`, `role`).
    ///
    /// Returns `false` without writing when a manual row owns that role or
    /// the existing sync row already carries the same provider and speed.
    pub fn upsert_synced(&self, record: CircuitRecord) -> bool {
        let mut rows = self.by_site.entry(site_key(&record.site)).or_default();
        if rows
            .iter()
            .any(|r| r.source == RecordSource::Manual && r.role == record.role)
        {
            return false;
        }
        match rows
            .iter_mut()
            .find(|r| r.source == RecordSource::EnrichedSync && r.role == record.role)
        {
            Some(existing)
                if existing.provider == record.provider && existing.speed == record.speed =>
            {
                false
            }
            Some(existing) => {
                *existing = CircuitRecord {
                    source: RecordSource::EnrichedSync,
                    ..record
                };
                true
            }
            None => {
                rows.push(CircuitRecord {
                    source: RecordSource::EnrichedSync,
                    ..record
                });
                true
            }
        }
    }

    pub fn flush(&self) -> Result<(), CoreError> {
        match &self.path {
            Some(path) => json::save(path, &self.snapshot()),
            None => Ok(()),
        }
    }
}
