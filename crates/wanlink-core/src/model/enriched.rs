// ── Enriched circuit rows ──
//
// The persisted output: one row per site with a field-set per WAN slot.
// `updated_at` and `version` are bookkeeping and never part of a diff.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::circuit::CircuitRole;
use super::site::Slot;

/// Per-slot confirmation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Nothing known about this slot yet.
    #[default]
    Absent,
    Unconfirmed,
    /// Came from a high-confidence match; automation may not downgrade it.
    Confirmed,
}

/// Who last set the slot's field-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotOrigin {
    #[default]
    Automated,
    /// Hand-edited; write-protected from automated re-matching.
    Manual,
}

/// Matcher tier that produced a slot's assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    ExactIp,
    Provider,
    Positional,
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ExactIp => "exact_ip",
            Self::Provider => "provider",
            Self::Positional => "positional",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSlot {
    #[serde(default)]
    pub ip: Option<IpAddr>,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub speed: String,
    #[serde(default)]
    pub monthly_cost: Option<f64>,
    pub role: CircuitRole,
    #[serde(default)]
    pub state: SlotState,
    #[serde(default)]
    pub origin: SlotOrigin,
    #[serde(default)]
    pub tier: Option<MatchTier>,
    #[serde(default)]
    pub record_number: Option<String>,
    #[serde(default)]
    pub registry_org: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl EnrichedSlot {
    /// An empty slot for a freshly seen site.
    pub fn absent(slot: Slot, now: DateTime<Utc>) -> Self {
        Self {
            ip: None,
            provider: String::new(),
            speed: String::new(),
            monthly_cost: None,
            role: slot.default_role(),
            state: SlotState::Absent,
            origin: SlotOrigin::Automated,
            tier: None,
            record_number: None,
            registry_org: None,
            updated_at: now,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == SlotState::Confirmed
    }

    pub fn is_manual(&self) -> bool {
        self.origin == SlotOrigin::Manual
    }

    /// Field-by-field differences, `updated_at` excluded.
    pub fn diff(&self, slot: Slot, other: &Self) -> Vec<FieldChange> {
        let mut changes = Vec::new();
        let mut check = |field: &'static str, old: String, new: String| {
            if old != new {
                changes.push(FieldChange {
                    slot,
                    field,
                    old,
                    new,
                });
            }
        };

        check("ip", display_opt(self.ip.as_ref()), display_opt(other.ip.as_ref()));
        check("provider", self.provider.clone(), other.provider.clone());
        check("speed", self.speed.clone(), other.speed.clone());
        check(
            "monthly_cost",
            self.monthly_cost.map(|c| format!("{c:.2}")).unwrap_or_default(),
            other.monthly_cost.map(|c| format!("{c:.2}")).unwrap_or_default(),
        );
        check("role", self.role.to_string(), other.role.to_string());
        check("state", format!("{:?}", self.state), format!("{:?}", other.state));
        check("origin", format!("{:?}", self.origin), format!("{:?}", other.origin));
        check(
            "tier",
            display_opt(self.tier.as_ref()),
            display_opt(other.tier.as_ref()),
        );
        check(
            "record_number",
            self.record_number.clone().unwrap_or_default(),
            other.record_number.clone().unwrap_or_default(),
        );
        check(
            "registry_org",
            self.registry_org.clone().unwrap_or_default(),
            other.registry_org.clone().unwrap_or_default(),
        );
        changes
    }
}

fn display_opt<T: fmt::Display>(value: Option<&T>) -> String {
    value.map(ToString::to_string).unwrap_or_default()
}

/// One changed field of an enriched row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub slot: Slot,
    pub field: &'static str,
    pub old: String,
    pub new: String,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {:?} -> {:?}", self.slot, self.field, self.old, self.new)
    }
}

/// Persisted enrichment for one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedCircuit {
    pub site: String,
    pub wan1: EnrichedSlot,
    pub wan2: EnrichedSlot,
    /// Optimistic-concurrency version, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

impl EnrichedCircuit {
    pub fn new(site: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            site: site.into(),
            wan1: EnrichedSlot::absent(Slot::Wan1, now),
            wan2: EnrichedSlot::absent(Slot::Wan2, now),
            version: 0,
        }
    }

    pub fn slot(&self, slot: Slot) -> &EnrichedSlot {
        match slot {
            Slot::Wan1 => &self.wan1,
            Slot::Wan2 => &self.wan2,
        }
    }

    pub fn slot_mut(&mut self, slot: Slot) -> &mut EnrichedSlot {
        match slot {
            Slot::Wan1 => &mut self.wan1,
            Slot::Wan2 => &mut self.wan2,
        }
    }

    /// Exchange the two slots' complete field-sets.
    pub fn swap_slots(&mut self) {
        std::mem::swap(&mut self.wan1, &mut self.wan2);
    }

    pub fn diff(&self, other: &Self) -> Vec<FieldChange> {
        let mut changes = self.wan1.diff(Slot::Wan1, &other.wan1);
        changes.extend(self.wan2.diff(Slot::Wan2, &other.wan2));
        changes
    }
}
