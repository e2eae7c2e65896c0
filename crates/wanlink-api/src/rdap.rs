// RDAP registry client
//
// Hierarchical IP lookups (`/ip/{addr}`) against a regional internet
// registry. Responses carry nested entities whose jCard (`vcardArray`)
// holds the display name and kind; selection of the owning organization
// lives in `wanlink-core`.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;
use url::Url;

use crate::client::RateLimitedClient;
use crate::error::Error;

pub const DEFAULT_RDAP_URL: &str = "https://rdap.arin.net/registry/";

/// RDAP `ip network` object (RFC 9083 §5.4), reduced to what we use.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpNetwork {
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start_address: Option<String>,
    #[serde(default)]
    pub end_address: Option<String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

/// RDAP entity. Entities nest: a registrant org may carry its own
/// abuse/tech/admin contacts, and reassignments nest the customer org.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub vcard_array: Option<serde_json::Value>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_action: String,
    #[serde(default)]
    pub event_date: Option<String>,
}

impl Entity {
    /// Text value of a jCard property, e.g. `fn` or `kind`.
    ///
    /// jCard layout: `["vcard", [[name, params, type, value], ...]]`.
    pub fn vcard_property(&self, label: &str) -> Option<&str> {
        self.vcard_array
            .as_ref()?
            .get(1)?
            .as_array()?
            .iter()
            .filter_map(serde_json::Value::as_array)
            .find(|prop| prop.first().and_then(serde_json::Value::as_str) == Some(label))
            .and_then(|prop| prop.get(3))
            .and_then(serde_json::Value::as_str)
    }

    /// Formatted name (`fn`).
    pub fn full_name(&self) -> Option<&str> {
        self.vcard_property("fn")
    }

    /// jCard kind: `org`, `individual`, `group`, ...
    pub fn kind(&self) -> Option<&str> {
        self.vcard_property("kind")
    }

    /// Most recent `registration` / `last changed` event date.
    pub fn latest_event(&self) -> Option<DateTime<FixedOffset>> {
        self.events
            .iter()
            .filter(|e| {
                let action = e.event_action.to_ascii_lowercase();
                action == "registration" || action == "last changed"
            })
            .filter_map(|e| e.event_date.as_deref())
            .filter_map(|d| DateTime::parse_from_rfc3339(d).ok())
            .max()
    }
}

/// Client for RDAP IP lookups, routed through the shared rate limiter.
pub struct RdapClient {
    client: Arc<RateLimitedClient>,
    base_url: Url,
}

impl RdapClient {
    pub fn new(client: Arc<RateLimitedClient>, base_url: &str) -> Result<Self, Error> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Look up the network object that contains `ip`.
    pub async fn lookup_ip(&self, ip: IpAddr) -> Result<IpNetwork, Error> {
        let url = self.base_url.join(&format!("ip/{ip}"))?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/rdap+json"));
        self.client.get_json(url, &[], headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(value: serde_json::Value) -> Entity {
        serde_json::from_value(value).unwrap_or_default()
    }

    #[test]
    fn reads_fn_and_kind_from_jcard() {
        let e = entity(json!({
            "handle": "CCCS",
            "vcardArray": ["vcard", [
                ["version", {}, "text", "4.0"],
                ["fn", {}, "text", "Comcast Cable Communications, LLC"],
                ["kind", {}, "text", "org"]
            ]]
        }));
        assert_eq!(e.full_name(), Some("Comcast Cable Communications, LLC"));
        assert_eq!(e.kind(), Some("org"));
        assert_eq!(e.vcard_property("adr"), None);
    }

    #[test]
    fn latest_event_ignores_unrelated_actions() {
        let e = entity(json!({
            "events": [
                {"eventAction": "registration", "eventDate": "2001-03-01T00:00:00-05:00"},
                {"eventAction": "last changed", "eventDate": "2019-07-15T10:00:00-04:00"},
                {"eventAction": "expiration", "eventDate": "2030-01-01T00:00:00Z"}
            ]
        }));
        let latest = e.latest_event().map(|d| d.to_rfc3339());
        assert_eq!(latest.as_deref(), Some("2019-07-15T10:00:00-04:00"));
    }

    #[test]
    fn missing_vcard_yields_none() {
        let e = Entity::default();
        assert!(e.full_name().is_none());
        assert!(e.latest_event().is_none());
    }
}
