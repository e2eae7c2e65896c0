pub mod config_cmd;
pub mod import;
pub mod resolve;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use wanlink_api::{AdaptiveThrottle, RateLimitedClient, RdapClient};
use wanlink_config::Config;
use wanlink_core::{MemoryRegistryCache, RegistryCache, RegistryResolver, StoreLayout};

use crate::error::CliError;

fn store_layout(config: &Config, dir: Option<PathBuf>) -> StoreLayout {
    dir.map_or_else(|| config.store_layout(), StoreLayout::new)
}

/// Rate-limited HTTP plumbing shared by everything that calls out.
///
/// One limiter covers both the dashboard and the registry, and one token
/// cancels every in-flight call.
struct Outbound {
    throttle: Arc<AdaptiveThrottle>,
    http: Arc<RateLimitedClient>,
    cancel: CancellationToken,
}

impl Outbound {
    fn new(config: &Config) -> Result<Self, CliError> {
        let throttle = Arc::new(AdaptiveThrottle::new(config.throttle_config()));
        let cancel = CancellationToken::new();
        let http = RateLimitedClient::new(&config.transport(), Arc::clone(&throttle))?
            .with_retry(config.retry_policy())
            .with_cancellation(cancel.clone());
        Ok(Self {
            throttle,
            http: Arc::new(http),
            cancel,
        })
    }

    fn resolver(
        &self,
        config: &Config,
        layout: &StoreLayout,
    ) -> Result<RegistryResolver<RdapClient>, CliError> {
        let rdap = RdapClient::new(Arc::clone(&self.http), &config.registry.base_url)?;
        let cache: Arc<dyn RegistryCache> = Arc::new(MemoryRegistryCache::open(
            &layout.registry_cache(),
            config.failure_retention(),
        )?);
        Ok(RegistryResolver::new(rdap, cache, config.resolver_config()?))
    }
}
