// ── Telemetry sources ──
//
// Produces the per-site snapshot the engine reconciles: one entry per
// site with the edge appliance's annotation and both WAN addresses.

use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;

use tracing::{debug, info};
use wanlink_api::DashboardClient;
use wanlink_api::dashboard::{Device, UplinkStatus};

use crate::error::CoreError;
use crate::model::{SiteTelemetry, WanInterface, site_key};

/// Anything that can produce a full telemetry snapshot.
pub trait TelemetrySource: Send + Sync {
    fn snapshot(&self) -> impl Future<Output = Result<Vec<SiteTelemetry>, CoreError>> + Send;
}

/// A fixed snapshot, for replaying a captured run and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTelemetry(pub Vec<SiteTelemetry>);

impl TelemetrySource for StaticTelemetry {
    async fn snapshot(&self) -> Result<Vec<SiteTelemetry>, CoreError> {
        Ok(self.0.clone())
    }
}

/// Live telemetry from the cloud dashboard.
pub struct DashboardTelemetry {
    client: DashboardClient,
    /// Organization name or id.
    organization: String,
    /// Appliance model prefix; other devices are ignored.
    model_prefix: String,
}

impl DashboardTelemetry {
    pub fn new(client: DashboardClient, organization: impl Into<String>) -> Self {
        Self {
            client,
            organization: organization.into(),
            model_prefix: "MX".into(),
        }
    }

    async fn organization_id(&self) -> Result<String, CoreError> {
        let wanted = self.organization.trim();
        self.client
            .list_organizations()
            .await?
            .into_iter()
            .find(|o| o.id == wanted || o.name.eq_ignore_ascii_case(wanted))
            .map(|o| o.id)
            .ok_or_else(|| CoreError::Config {
                message: format!("dashboard organization {wanted:?} not found"),
            })
    }

    fn is_edge_appliance(&self, device: &Device) -> bool {
        device.model.as_deref().is_some_and(|m| {
            m.get(..self.model_prefix.len())
                .is_some_and(|p| p.eq_ignore_ascii_case(&self.model_prefix))
        })
    }
}

impl TelemetrySource for DashboardTelemetry {
    async fn snapshot(&self) -> Result<Vec<SiteTelemetry>, CoreError> {
        let org_id = self.organization_id().await?;

        let networks = self.client.list_networks(&org_id).await?;
        let devices = self.client.list_appliances(&org_id).await?;
        let uplinks = self.client.list_uplink_statuses(&org_id).await?;

        let networks: HashMap<String, _> = networks.into_iter().map(|n| (n.id.clone(), n)).collect();
        let uplinks: HashMap<String, UplinkStatus> =
            uplinks.into_iter().map(|u| (u.serial.clone(), u)).collect();

        let mut sites: Vec<SiteTelemetry> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for device in devices.iter().filter(|d| self.is_edge_appliance(d)) {
            let Some(network) = device.network_id.as_ref().and_then(|id| networks.get(id)) else {
                debug!(serial = %device.serial, "appliance not bound to a network");
                continue;
            };
            let site = network.name.as_deref().map(str::trim).unwrap_or_default();
            if site.is_empty() {
                continue;
            }

            let status = uplinks.get(&device.serial);
            let interface = |name: &str| WanInterface {
                ip: status
                    .and_then(|s| s.uplinks.iter().find(|u| u.interface.eq_ignore_ascii_case(name)))
                    .and_then(|u| u.address())
                    .and_then(|a| a.trim().parse::<IpAddr>().ok()),
                registry_hint: None,
            };
            let entry = SiteTelemetry {
                site: site.to_owned(),
                annotation: device.notes.clone().unwrap_or_default(),
                wan1: interface("wan1"),
                wan2: interface("wan2"),
                tags: network.tags.clone(),
            };

            // HA pairs: keep the appliance that carries the annotation.
            match seen.get(&site_key(site)) {
                Some(&i) if sites[i].annotation.trim().is_empty() => sites[i] = entry,
                Some(_) => {}
                None => {
                    seen.insert(site_key(site), sites.len());
                    sites.push(entry);
                }
            }
        }

        info!(
            networks = networks.len(),
            appliances = devices.len(),
            sites = sites.len(),
            "telemetry snapshot fetched"
        );
        Ok(sites)
    }
}
