// ── Site and WAN interface types ──

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::circuit::CircuitRole;

/// Store key for a site name: whitespace collapsed, upper-cased.
///
/// The extract and telemetry spell the same site with different casing
/// and spacing (`"alb 01"`, `"ALB  01"`).
pub fn site_key(name: &str) -> String {
    crate::text::collapse_whitespace(name).to_uppercase()
}

/// Physical WAN slot on a site's edge appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Wan1,
    Wan2,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Wan1, Slot::Wan2];

    pub fn index(self) -> usize {
        match self {
            Self::Wan1 => 0,
            Self::Wan2 => 1,
        }
    }

    pub fn other(self) -> Slot {
        match self {
            Self::Wan1 => Self::Wan2,
            Self::Wan2 => Self::Wan1,
        }
    }

    /// Role assumed when nothing better is known.
    pub fn default_role(self) -> CircuitRole {
        match self {
            Self::Wan1 => CircuitRole::Primary,
            Self::Wan2 => CircuitRole::Secondary,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wan1 => "wan1",
            Self::Wan2 => "wan2",
        })
    }
}

/// One WAN interface as reported by live telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WanInterface {
    /// Public (or, occasionally, private) interface address.
    pub ip: Option<IpAddr>,
    /// Registry organization remembered from a prior run, if any.
    pub registry_hint: Option<String>,
}

/// Per-site telemetry snapshot: the appliance annotation plus both WAN
/// interfaces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteTelemetry {
    pub site: String,
    /// Free-text device annotation carrying provider/speed per slot.
    pub annotation: String,
    pub wan1: WanInterface,
    pub wan2: WanInterface,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SiteTelemetry {
    pub fn interface(&self, slot: Slot) -> &WanInterface {
        match slot {
            Slot::Wan1 => &self.wan1,
            Slot::Wan2 => &self.wan2,
        }
    }

    pub fn ips(&self) -> (Option<IpAddr>, Option<IpAddr>) {
        (self.wan1.ip, self.wan2.ip)
    }
}

/// A telemetry slot after annotation parsing and registry resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotObservation {
    pub ip: Option<IpAddr>,
    /// Provider parsed from the annotation; empty when absent.
    pub provider: String,
    /// Speed parsed from the annotation; empty when absent.
    pub speed: String,
    /// Organization resolved from the public-IP registry.
    pub registry_org: Option<String>,
}

impl SlotObservation {
    /// Provider to match on: the annotation, else the registry organization.
    pub fn match_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.provider.as_str())
            .chain(self.registry_org.as_deref())
            .filter(|name| !name.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_helpers() {
        assert_eq!(Slot::Wan1.other(), Slot::Wan2);
        assert_eq!(Slot::Wan2.index(), 1);
        assert_eq!(Slot::Wan2.default_role(), CircuitRole::Secondary);
        assert_eq!(Slot::Wan1.to_string(), "wan1");
    }

    #[test]
    fn site_keys_ignore_case_and_spacing() {
        assert_eq!(site_key(" alb  01 "), "ALB 01");
        assert_eq!(site_key("ALB 01"), site_key("Alb 01"));
    }

    #[test]
    fn match_names_skips_blanks() {
        let obs = SlotObservation {
            provider: String::new(),
            registry_org: Some("Comcast".into()),
            ..SlotObservation::default()
        };
        assert_eq!(obs.match_names().collect::<Vec<_>>(), vec!["Comcast"]);
    }
}
