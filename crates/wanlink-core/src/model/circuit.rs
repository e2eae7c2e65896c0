// ── Authoritative circuit records ──
//
// One row per externally tracked circuit. Extract-sourced rows are
// replaced wholesale on every import; manual rows are never touched by
// automation; enriched-sync rows are owned by the post-run sync.

use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a circuit is for at its site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CircuitRole {
    Primary,
    Secondary,
    /// Any other purpose, kept verbatim (`Backup`, `Cellular`, ...).
    Other(String),
}

impl From<&str> for CircuitRole {
    fn from(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("primary") {
            Self::Primary
        } else if trimmed.eq_ignore_ascii_case("secondary") {
            Self::Secondary
        } else {
            Self::Other(trimmed.to_owned())
        }
    }
}

impl From<String> for CircuitRole {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<CircuitRole> for String {
    fn from(role: CircuitRole) -> Self {
        role.to_string()
    }
}

impl fmt::Display for CircuitRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("Primary"),
            Self::Secondary => f.write_str("Secondary"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// Lifecycle status of an authoritative record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CircuitStatus {
    Enabled,
    Disabled,
    Other(String),
}

impl CircuitStatus {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }

    /// Lower sorts first in tie-breaks.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Enabled => 0,
            Self::Other(_) => 1,
            Self::Disabled => 2,
        }
    }
}

impl From<&str> for CircuitStatus {
    fn from(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("enabled") || trimmed.eq_ignore_ascii_case("active") {
            Self::Enabled
        } else if trimmed.eq_ignore_ascii_case("disabled")
            || trimmed.eq_ignore_ascii_case("cancelled")
            || trimmed.eq_ignore_ascii_case("canceled")
        {
            Self::Disabled
        } else {
            Self::Other(trimmed.to_owned())
        }
    }
}

impl From<String> for CircuitStatus {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<CircuitStatus> for String {
    fn from(status: CircuitStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => f.write_str("Enabled"),
            Self::Disabled => f.write_str("Disabled"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// Where an authoritative row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    /// The partner extract.
    Extract,
    /// Hand-entered; never overwritten by automation.
    Manual,
    /// Written back from confirmed enriched data.
    EnrichedSync,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitRecord {
    #[serde(default)]
    pub record_number: Option<String>,
    pub site: String,
    pub role: CircuitRole,
    pub provider: String,
    #[serde(default)]
    pub speed: String,
    #[serde(default)]
    pub monthly_cost: Option<f64>,
    pub status: CircuitStatus,
    #[serde(default)]
    pub ip: Option<IpAddr>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    pub source: RecordSource,
}

impl CircuitRecord {
    /// Deterministic tie-break: enabled first, then most recently seen,
    /// then record number and provider.
    pub fn tie_break(&self, other: &Self) -> Ordering {
        self.status
            .priority()
            .cmp(&other.status.priority())
            .then_with(|| other.last_seen.cmp(&self.last_seen))
            .then_with(|| self.record_number.cmp(&other.record_number))
            .then_with(|| self.provider.cmp(&other.provider))
    }

    /// Identity used to keep manual rows across an import.
    pub fn identity(&self) -> (String, Option<String>, CircuitRole) {
        (
            self.site.clone(),
            self.record_number.clone(),
            self.role.clone(),
        )
    }
}
