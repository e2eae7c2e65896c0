//! `wanlink resolve`: registry lookups through the shared cache.

use tracing::warn;
use wanlink_config::Config;
use wanlink_core::CoreError;

use super::{Outbound, store_layout};
use crate::cli::ResolveArgs;
use crate::error::CliError;

pub async fn handle(args: ResolveArgs, config: &Config) -> Result<(), CliError> {
    let layout = store_layout(config, args.store_dir);
    let outbound = Outbound::new(config)?;
    let resolver = outbound.resolver(config, &layout)?;

    for ip in args.ips {
        match resolver.resolve(ip).await {
            Ok(org) => println!("{ip}\t{org}"),
            Err(CoreError::PrivateAddress { .. }) => println!("{ip}\t(private)"),
            Err(CoreError::Cancelled) => return Err(CliError::Cancelled),
            Err(e) => {
                warn!(%ip, error = %e, "lookup failed");
                println!("{ip}\t(unresolved)");
            }
        }
    }

    resolver.cache().flush()?;
    Ok(())
}
