// ── Runtime run configuration ──
//
// These types describe *how* one reconciliation pass runs. They never
// touch disk; the binary builds them from `wanlink-config` and hands
// them in.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::matcher::MatchConfig;
use crate::registry::ResolverConfig;

/// Where the JSON-backed stores live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub dir: PathBuf,
}

impl StoreLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn enriched(&self) -> PathBuf {
        self.dir.join("enriched_circuits.json")
    }

    pub fn circuits(&self) -> PathBuf {
        self.dir.join("circuits.json")
    }

    pub fn registry_cache(&self) -> PathBuf {
        self.dir.join("registry_cache.json")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Sites reconciled at once.
    pub concurrency: usize,
    /// Hard limit for the whole pass; outstanding calls are cancelled.
    pub run_timeout: Duration,
    /// Circuit extract imported before matching; `None` reuses the
    /// records from the previous import.
    pub extract_path: Option<PathBuf>,
    /// Case-insensitive substrings; matching site names are skipped.
    pub exclude_patterns: Vec<String>,
    /// Remove enriched rows for sites no longer in telemetry.
    pub prune_missing: bool,
    /// Write confirmed slots back as circuit records where the extract
    /// has none.
    pub sync_confirmed: bool,
    /// Attempts after a `ConcurrentUpdateConflict`.
    pub conflict_retries: u32,
    pub conflict_backoff: Duration,
    pub matching: MatchConfig,
    pub resolver: ResolverConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            run_timeout: Duration::from_secs(2 * 60 * 60),
            extract_path: None,
            exclude_patterns: default_exclude_patterns(),
            prune_missing: true,
            sync_confirmed: true,
            conflict_retries: 3,
            conflict_backoff: Duration::from_millis(50),
            matching: MatchConfig::default(),
            resolver: ResolverConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn is_excluded(&self, site: &str) -> bool {
        let lower = site.to_lowercase();
        self.exclude_patterns
            .iter()
            .filter(|p| !p.trim().is_empty())
            .any(|p| lower.contains(&p.trim().to_lowercase()))
    }
}

pub fn default_exclude_patterns() -> Vec<String> {
    ["hub", "lab", "voice", "datacenter", "test"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}
