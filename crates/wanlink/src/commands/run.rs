//! `wanlink run`: one full reconciliation pass.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use wanlink_api::{DashboardClient, RdapClient};
use wanlink_config::{Config, resolve_api_key};
use wanlink_core::{
    Canonicalizer, CircuitTable, DashboardTelemetry, EnrichedStore, EnrichedTable, Engine,
    RunSummary, SiteTelemetry, StaticTelemetry, TelemetrySource,
};

use super::{Outbound, store_layout};
use crate::cli::RunArgs;
use crate::error::CliError;

pub async fn handle(args: RunArgs, config: &Config) -> Result<(), CliError> {
    // Credentials first: nothing is loaded or fetched without them.
    let api_key = match &args.snapshot {
        Some(_) => None,
        None => Some(resolve_api_key(&config.dashboard)?),
    };

    let mut run_config = config.run_config()?;
    if let Some(extract) = args.extract {
        run_config.extract_path = Some(extract);
    }
    if let Some(concurrency) = args.concurrency {
        run_config.concurrency = concurrency.max(1);
    }
    if let Some(secs) = args.timeout {
        run_config.run_timeout = Duration::from_secs(secs.max(1));
    }
    if args.no_prune {
        run_config.prune_missing = false;
    }
    let timeout_secs = run_config.run_timeout.as_secs();

    let layout = store_layout(config, args.store_dir);
    let outbound = Outbound::new(config)?;
    let resolver = outbound.resolver(config, &layout)?;
    let canon = Arc::new(Canonicalizer::new(config.provider_tables()));
    let enriched: Arc<dyn EnrichedStore> = Arc::new(EnrichedTable::open(&layout.enriched())?);
    let circuits = Arc::new(CircuitTable::open(&layout.circuits())?);
    info!(
        store = %layout.dir().display(),
        circuits = circuits.len(),
        "stores loaded"
    );

    let summary = match (args.snapshot, api_key) {
        (Some(path), _) => {
            let telemetry = StaticTelemetry(load_snapshot(&path)?);
            let engine = Engine::new(telemetry, resolver, canon, enriched, circuits, run_config);
            execute(engine, &outbound).await?
        }
        (None, Some(key)) => {
            let client =
                DashboardClient::new(Arc::clone(&outbound.http), &config.dashboard.base_url, &key)?;
            let telemetry = DashboardTelemetry::new(client, config.organization()?);
            let engine = Engine::new(telemetry, resolver, canon, enriched, circuits, run_config);
            execute(engine, &outbound).await?
        }
        (None, None) => {
            return Err(CliError::NoCredentials {
                env: config.dashboard.api_key_env.clone(),
            });
        }
    };

    outcome(&summary, timeout_secs)
}

fn load_snapshot(path: &Path) -> Result<Vec<SiteTelemetry>, CliError> {
    let text = std::fs::read_to_string(path)?;
    let sites: Vec<SiteTelemetry> = serde_json::from_str(&text)?;
    info!(path = %path.display(), sites = sites.len(), "replaying telemetry snapshot");
    Ok(sites)
}

async fn execute<T: TelemetrySource>(
    engine: Engine<T, RdapClient>,
    outbound: &Outbound,
) -> Result<RunSummary, CliError> {
    let engine = engine
        .with_cancellation(outbound.cancel.clone())
        .with_throttle(Arc::clone(&outbound.throttle));

    let cancel = outbound.cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping");
            cancel.cancel();
        }
    });

    let result = engine.run().await;
    interrupt.abort();
    Ok(result?)
}

fn outcome(summary: &RunSummary, timeout_secs: u64) -> Result<(), CliError> {
    if summary.timed_out {
        return Err(CliError::Timeout {
            seconds: timeout_secs,
        });
    }
    if summary.cancelled {
        return Err(CliError::Cancelled);
    }
    if summary.sites_failed > 0 {
        warn!(
            failed = summary.sites_failed,
            processed = summary.sites_processed,
            "some sites failed to reconcile; see the error lines above"
        );
    }
    Ok(())
}
