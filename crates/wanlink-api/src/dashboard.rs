// Cloud dashboard API client
//
// Base path: /api/v1/
// Auth: X-Cisco-Meraki-API-Key header
//
// Only the read endpoints the nightly run needs: organizations, networks,
// appliance devices (with free-text notes) and uplink statuses. List
// endpoints use cursor pagination (`perPage` + `startingAfter`).

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::client::RateLimitedClient;
use crate::error::Error;

pub const DEFAULT_DASHBOARD_URL: &str = "https://api.meraki.com/api/v1/";
const API_KEY_HEADER: &str = "X-Cisco-Meraki-API-Key";
const PAGE_SIZE: usize = 1000;

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub serial: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UplinkStatus {
    pub serial: String,
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(default)]
    pub uplinks: Vec<Uplink>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Uplink {
    /// `wan1`, `wan2`, `cellular`
    pub interface: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub ip_assigned_by: Option<String>,
}

impl Uplink {
    /// The interface address, falling back to the observed public IP.
    pub fn address(&self) -> Option<&str> {
        self.ip
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.public_ip.as_deref().filter(|s| !s.trim().is_empty()))
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Read-only dashboard client. Every call goes through the shared
/// [`RateLimitedClient`].
pub struct DashboardClient {
    client: Arc<RateLimitedClient>,
    base_url: Url,
    api_key: HeaderValue,
}

impl DashboardClient {
    pub fn new(
        client: Arc<RateLimitedClient>,
        base_url: &str,
        api_key: &SecretString,
    ) -> Result<Self, Error> {
        let mut api_key =
            HeaderValue::from_str(api_key.expose_secret()).map_err(|e| Error::Authentication {
                message: format!("invalid API key header value: {e}"),
            })?;
        api_key.set_sensitive(true);

        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, self.api_key.clone());
        headers
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, Error> {
        let url = self.base_url.join(path)?;
        self.client.get_json(url, query, self.headers()).await
    }

    /// Collect every page of a cursor-paginated list.
    ///
    /// `cursor` extracts the `startingAfter` value from the last item of a
    /// page; a short page or a missing cursor ends the walk.
    async fn paginate<T, F>(
        &self,
        path: &str,
        extra: &[(&str, String)],
        cursor: F,
    ) -> Result<Vec<T>, Error>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> Option<String>,
    {
        let mut all: Vec<T> = Vec::new();
        let mut starting_after: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = extra.to_vec();
            query.push(("perPage", PAGE_SIZE.to_string()));
            if let Some(ref after) = starting_after {
                query.push(("startingAfter", after.clone()));
            }

            let page: Vec<T> = self.get(path, &query).await?;
            let received = page.len();
            let next = page.last().and_then(&cursor);
            all.extend(page);
            debug!(path, received, total = all.len(), "fetched page");

            match next {
                Some(after) if received >= PAGE_SIZE => starting_after = Some(after),
                _ => break,
            }
        }

        Ok(all)
    }

    pub async fn list_organizations(&self) -> Result<Vec<Organization>, Error> {
        self.get("organizations", &[]).await
    }

    /// Find an organization by exact name.
    pub async fn find_organization(&self, name: &str) -> Result<Option<Organization>, Error> {
        Ok(self
            .list_organizations()
            .await?
            .into_iter()
            .find(|o| o.name == name))
    }

    pub async fn list_networks(&self, org_id: &str) -> Result<Vec<Network>, Error> {
        self.paginate(&format!("organizations/{org_id}/networks"), &[], |n: &Network| {
            Some(n.id.clone())
        })
        .await
    }

    /// Appliance devices (security gateways) across the organization.
    pub async fn list_appliances(&self, org_id: &str) -> Result<Vec<Device>, Error> {
        self.paginate(
            &format!("organizations/{org_id}/devices"),
            &[("productTypes[]", "appliance".to_owned())],
            |d: &Device| Some(d.serial.clone()),
        )
        .await
    }

    pub async fn list_uplink_statuses(&self, org_id: &str) -> Result<Vec<UplinkStatus>, Error> {
        self.paginate(
            &format!("organizations/{org_id}/appliance/uplink/statuses"),
            &[],
            |u: &UplinkStatus| Some(u.serial.clone()),
        )
        .await
    }
}
