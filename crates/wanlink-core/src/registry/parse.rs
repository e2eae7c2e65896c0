// ── Registry response interpretation ──
//
// Turns an RDAP network object into a single owning-organization name:
// pick the most recently effective organization entity, clean it up and
// fold well-known variants into one company name. Falls back to the
// network name when the response carries no usable entity.

use chrono::{DateTime, FixedOffset};
use wanlink_api::rdap::{Entity, IpNetwork};

use crate::text::contains_phrase;

const PERSONAL_TITLES: &[&str] = &["Mr.", "Ms.", "Mrs.", "Dr.", "Miss"];
const ROLE_WORDS: &[&str] = &["admin", "technical", "abuse", "noc"];

/// `(canonical company, variants)`; a variant anywhere in the name maps it.
pub fn default_company_map() -> Vec<(String, Vec<String>)> {
    let entry = |company: &str, variants: &[&str]| {
        (
            company.to_owned(),
            variants.iter().map(|v| (*v).to_owned()).collect(),
        )
    };
    vec![
        entry(
            "AT&T",
            &[
                "AT&T",
                "AT&T Internet Services",
                "AT&T Enterprises",
                "AT&T Broadband",
                "IPAdmin-ATT Internet Services",
                "AT&T Communications",
                "AT&T Business",
            ],
        ),
        entry("Charter Communications", &["Charter Communications"]),
        entry(
            "Comcast",
            &["Comcast Cable", "Comcast Communications", "Comcast Corporation"],
        ),
        entry("Cox Communications", &["Cox Communications"]),
        entry(
            "CenturyLink",
            &[
                "CenturyLink",
                "Lumen Technologies",
                "Level 3 Parent",
                "Level 3 Communications",
                "Level3",
            ],
        ),
        entry("Frontier Communications", &["Frontier Communications"]),
        entry(
            "Verizon",
            &[
                "Verizon Communications",
                "Verizon Internet",
                "Verizon Business",
                "Verizon Wireless",
            ],
        ),
        entry("Optimum", &["Optimum", "Altice USA", "Suddenlink Communications"]),
        entry("Crown Castle", &["Crown Castle"]),
        entry("Cable One", &["Cable One"]),
        entry("Starlink", &["SpaceX", "Space Exploration Technologies", "Starlink"]),
    ]
}

/// Network-name substrings that identify a carrier when no entity does.
fn network_name_hint(name: &str) -> Option<&'static str> {
    let upper = name.to_uppercase();
    if upper.starts_with("SBC-") {
        return Some("AT&T");
    }
    const HINTS: &[(&str, &str)] = &[
        ("CHARTER", "Charter Communications"),
        ("COMCAST", "Comcast"),
        ("COX", "Cox Communications"),
        ("VERIZON", "Verizon"),
        ("CENTURYLINK", "CenturyLink"),
        ("FRONTIER", "Frontier Communications"),
        ("CC04", "Charter Communications"),
        ("SPACEX", "Starlink"),
    ];
    HINTS
        .iter()
        .find(|(needle, _)| upper.contains(needle))
        .map(|(_, company)| *company)
}

struct Candidate<'a> {
    name: &'a str,
    is_org: bool,
    latest: Option<DateTime<FixedOffset>>,
}

fn collect<'a>(entities: &'a [Entity], out: &mut Vec<Candidate<'a>>) {
    for entity in entities {
        if let Some(name) = entity.full_name().map(str::trim).filter(|n| !n.is_empty()) {
            let kind = entity.kind().unwrap_or_default();
            let is_org = kind.eq_ignore_ascii_case("org");
            let is_person = kind.eq_ignore_ascii_case("individual")
                || PERSONAL_TITLES.iter().any(|t| contains_phrase(name, t));
            let is_role = ROLE_WORDS.iter().any(|w| contains_phrase(name, w));
            let is_registrant = entity
                .roles
                .iter()
                .any(|r| r.eq_ignore_ascii_case("registrant") || r.eq_ignore_ascii_case("customer"));

            if !is_person && !is_role && (is_org || is_registrant) {
                out.push(Candidate {
                    name,
                    is_org,
                    latest: entity.latest_event(),
                });
            }
        }
        collect(&entity.entities, out);
    }
}

/// Interprets RDAP responses.
#[derive(Debug, Clone)]
pub struct ResponseInterpreter {
    companies: Vec<(String, Vec<String>)>,
}

impl Default for ResponseInterpreter {
    fn default() -> Self {
        Self::new(default_company_map())
    }
}

impl ResponseInterpreter {
    pub fn new(companies: Vec<(String, Vec<String>)>) -> Self {
        Self { companies }
    }

    /// Owning organization, or `None` when the response names nothing.
    ///
    /// Explicit `org` entities beat registrant entities of other kinds;
    /// within a group the newest registration / last-changed event wins.
    pub fn organization(&self, network: &IpNetwork) -> Option<String> {
        let mut candidates = Vec::new();
        collect(&network.entities, &mut candidates);
        // Stable sort keeps document order for equal keys.
        candidates.sort_by(|a, b| b.is_org.cmp(&a.is_org).then(b.latest.cmp(&a.latest)));

        let network_name = network.name.as_deref().map(str::trim).unwrap_or_default();

        if network_name.eq_ignore_ascii_case("CABLEONE")
            && candidates
                .iter()
                .any(|c| c.name.to_lowercase().contains("cable one"))
        {
            return Some("Cable One".to_owned());
        }

        if let Some(best) = candidates.first() {
            let cleaned = strip_private_customer(best.name);
            if !cleaned.is_empty() {
                return Some(self.fold_company(cleaned));
            }
        }

        if network_name.is_empty() {
            return None;
        }
        Some(
            network_name_hint(network_name)
                .map_or_else(|| network_name.to_owned(), str::to_owned),
        )
    }

    fn fold_company(&self, name: &str) -> String {
        let lower = name.to_lowercase();
        self.companies
            .iter()
            .find(|(_, variants)| variants.iter().any(|v| lower.contains(&v.to_lowercase())))
            .map_or_else(|| name.to_owned(), |(company, _)| company.clone())
    }
}

fn strip_private_customer(name: &str) -> &str {
    const PREFIX: &str = "private customer -";
    match name.get(..PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(PREFIX) => name[PREFIX.len()..].trim(),
        _ => name.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn network(value: serde_json::Value) -> IpNetwork {
        serde_json::from_value(value).unwrap_or_default()
    }

    fn org(name: &str, kind: &str, changed: &str) -> serde_json::Value {
        json!({
            "roles": ["registrant"],
            "vcardArray": ["vcard", [["fn", {}, "text", name], ["kind", {}, "text", kind]]],
            "events": [{"eventAction": "last changed", "eventDate": changed}]
        })
    }

    #[test]
    fn newest_org_entity_wins() {
        let net = network(json!({
            "name": "NET-1",
            "entities": [
                org("Level 3 Parent, LLC", "org", "2012-01-01T00:00:00Z"),
                {
                    "roles": ["registrant"],
                    "vcardArray": ["vcard", [["fn", {}, "text", "Outer"], ["kind", {}, "text", "group"]]],
                    "entities": [org("Private Customer - Acme Grocers", "org", "2021-06-01T00:00:00Z")]
                }
            ]
        }));
        assert_eq!(
            ResponseInterpreter::default().organization(&net).as_deref(),
            Some("Acme Grocers")
        );
    }

    #[test]
    fn org_kind_beats_newer_individual_and_roles() {
        let net = network(json!({
            "entities": [
                org("Comcast Cable Communications, LLC", "org", "2010-01-01T00:00:00Z"),
                org("Jane Smith", "individual", "2023-01-01T00:00:00Z"),
                org("Abuse Desk", "org", "2024-01-01T00:00:00Z"),
                org("Dr. Who", "org", "2024-01-01T00:00:00Z")
            ]
        }));
        assert_eq!(
            ResponseInterpreter::default().organization(&net).as_deref(),
            Some("Comcast")
        );
    }

    #[test]
    fn folds_company_variants() {
        let interp = ResponseInterpreter::default();
        for (raw, want) in [
            ("AT&T Enterprises, LLC", "AT&T"),
            ("Charter Communications Inc", "Charter Communications"),
            ("Lumen Technologies, Inc.", "CenturyLink"),
            ("Suddenlink Communications", "Optimum"),
            ("SpaceX Services, Inc.", "Starlink"),
            ("Ritter Communications", "Ritter Communications"),
        ] {
            let net = network(json!({ "entities": [org(raw, "org", "2020-01-01T00:00:00Z")] }));
            assert_eq!(interp.organization(&net).as_deref(), Some(want), "{raw}");
        }
    }

    #[test]
    fn cableone_special_case() {
        let net = network(json!({
            "name": "CABLEONE",
            "entities": [
                org("Some Reseller", "org", "2022-01-01T00:00:00Z"),
                org("CABLE ONE, INC.", "org", "2001-01-01T00:00:00Z")
            ]
        }));
        assert_eq!(
            ResponseInterpreter::default().organization(&net).as_deref(),
            Some("Cable One")
        );
    }

    #[test]
    fn falls_back_to_network_name() {
        let interp = ResponseInterpreter::default();
        let sbc = network(json!({ "name": "SBC-99-0-0-0-1" }));
        assert_eq!(interp.organization(&sbc).as_deref(), Some("AT&T"));

        let charter = network(json!({ "name": "CC04-NET" }));
        assert_eq!(interp.organization(&charter).as_deref(), Some("Charter Communications"));

        let other = network(json!({ "name": "RITTER-NET" }));
        assert_eq!(interp.organization(&other).as_deref(), Some("RITTER-NET"));
    }

    #[test]
    fn empty_response_is_none() {
        assert_eq!(ResponseInterpreter::default().organization(&IpNetwork::default()), None);
    }
}
