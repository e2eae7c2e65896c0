// ── Reconciliation engine ──
//
// One pass: import the extract, fetch telemetry, then for every site
// parse the annotation, resolve both public IPs, match and write. Sites
// run concurrently up to `concurrency`; a site is only ever written by
// one task at a time. The whole pass is bounded by `run_timeout` and the
// engine's cancellation token. Rows already written stay written, and a
// rerun converges on the same state.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wanlink_api::AdaptiveThrottle;

use crate::canon::Canonicalizer;
use crate::config::RunConfig;
use crate::error::CoreError;
use crate::extract::load_extract;
use crate::matcher::CircuitMatcher;
use crate::model::{
    CircuitRecord, CircuitStatus, EnrichedCircuit, MatchTier, RecordSource, SiteTelemetry, Slot,
    SlotObservation, WanInterface, site_key,
};
use crate::notes::{NotesNormalizer, SlotNotes};
use crate::reconcile::{Reconciler, Transition};
use crate::registry::{RegistryLookup, RegistryResolver};
use crate::store::{CircuitTable, EnrichedStore};
use crate::summary::RunSummary;
use crate::telemetry::TelemetrySource;

/// What stopped a pass early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Timeout,
    Cancelled,
}

/// How a slot's registry organization was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Resolved,
    NoAddress,
    Private,
    Failed,
}

#[derive(Debug, Default)]
struct SiteReport {
    transition: Option<Transition>,
    written: bool,
    tiers: Vec<MatchTier>,
    parse_errors: usize,
    ambiguities: usize,
    unassigned: usize,
    private_addresses: usize,
    registry_failures: usize,
    conflicts: usize,
}

impl RunSummary {
    fn absorb(&mut self, report: SiteReport) {
        self.sites_processed += 1;
        if let Some(transition) = report.transition {
            self.record_transition(transition);
        }
        if report.written {
            self.written += 1;
        } else {
            self.unchanged += 1;
        }
        for tier in report.tiers {
            self.tiers.record(tier);
        }
        self.parse_errors += report.parse_errors;
        self.ambiguities += report.ambiguities;
        self.unassigned_candidates += report.unassigned;
        self.private_addresses += report.private_addresses;
        self.registry_failures += report.registry_failures;
        self.conflicts_retried += report.conflicts;
    }
}

pub struct Engine<T, L> {
    telemetry: T,
    resolver: RegistryResolver<L>,
    normalizer: NotesNormalizer,
    reconciler: Reconciler,
    enriched: Arc<dyn EnrichedStore>,
    circuits: Arc<CircuitTable>,
    config: RunConfig,
    cancel: CancellationToken,
    throttle: Option<Arc<AdaptiveThrottle>>,
    site_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<T: TelemetrySource, L: RegistryLookup> Engine<T, L> {
    pub fn new(
        telemetry: T,
        resolver: RegistryResolver<L>,
        canon: Arc<Canonicalizer>,
        enriched: Arc<dyn EnrichedStore>,
        circuits: Arc<CircuitTable>,
        config: RunConfig,
    ) -> Self {
        let reconciler = Reconciler::new(CircuitMatcher::new(canon, config.matching));
        Self {
            telemetry,
            resolver,
            normalizer: NotesNormalizer::default(),
            reconciler,
            enriched,
            circuits,
            config,
            cancel: CancellationToken::new(),
            throttle: None,
            site_locks: DashMap::new(),
        }
    }

    /// Share a token with the outbound clients so a timeout stops them too.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Report this limiter's state in the run summary.
    pub fn with_throttle(mut self, throttle: Arc<AdaptiveThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn with_normalizer(mut self, normalizer: NotesNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one full pass.
    ///
    /// Per-site failures are counted and logged; only an unreachable store
    /// or a failed telemetry fetch ends the pass with an error.
    pub async fn run(&self) -> Result<RunSummary, CoreError> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.run_timeout;
        let mut summary = RunSummary::default();

        self.import_extract(&mut summary);

        let snapshot = tokio::select! {
            result = self.telemetry.snapshot() => result,
            reason = self.interrupted(deadline) => {
                self.note_interrupt(reason, &mut summary);
                return self.finish(summary, started);
            }
        };
        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "telemetry fetch failed");
                self.finish(summary, started)?;
                return Err(e);
            }
        };

        let mut visible: HashSet<String> = HashSet::new();
        let mut sites: Vec<SiteTelemetry> = Vec::new();
        for site in snapshot {
            summary.sites_seen += 1;
            visible.insert(site_key(&site.site));
            if self.config.is_excluded(&site.site) {
                debug!(site = %site.site, "site excluded");
                summary.sites_excluded += 1;
                continue;
            }
            sites.push(site);
        }
        info!(sites = sites.len(), excluded = summary.sites_excluded, "reconciling sites");

        let mut fatal: Option<CoreError> = None;
        let mut interrupted = false;
        {
            let mut results = futures_util::stream::iter(sites.iter())
                .map(|site| async move { (site, self.process_site(site).await) })
                .buffer_unordered(self.config.concurrency.max(1));
            let interrupt = self.interrupted(deadline);
            tokio::pin!(interrupt);

            loop {
                tokio::select! {
                    next = results.next() => match next {
                        Some((_, Ok(report))) => summary.absorb(report),
                        Some((site, Err(e @ CoreError::StoreUnavailable { .. }))) => {
                            error!(site = %site.site, error = %e, "store unavailable; aborting run");
                            fatal = Some(e);
                            break;
                        }
                        Some((site, Err(CoreError::Cancelled))) => {
                            debug!(site = %site.site, "site cancelled");
                        }
                        Some((site, Err(e))) => {
                            summary.sites_failed += 1;
                            error!(site = %site.site, error = %e, "site reconciliation failed");
                        }
                        None => break,
                    },
                    reason = &mut interrupt => {
                        self.note_interrupt(reason, &mut summary);
                        interrupted = true;
                        break;
                    }
                }
            }
        }

        if let Some(e) = fatal {
            summary.elapsed = started.elapsed();
            summary.log();
            return Err(e);
        }

        if !interrupted {
            if self.config.sync_confirmed {
                summary.synced = self.sync_confirmed()?;
            }
            if self.config.prune_missing && !visible.is_empty() {
                summary.pruned = self.prune(&visible)?;
            }
        }

        self.finish(summary, started)
    }

    async fn interrupted(&self, deadline: tokio::time::Instant) -> Interrupt {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => Interrupt::Timeout,
            () = self.cancel.cancelled() => Interrupt::Cancelled,
        }
    }

    fn note_interrupt(&self, reason: Interrupt, summary: &mut RunSummary) {
        match reason {
            Interrupt::Timeout => {
                warn!(
                    timeout_secs = self.config.run_timeout.as_secs(),
                    "run timed out; cancelling outstanding calls"
                );
                summary.timed_out = true;
            }
            Interrupt::Cancelled => {
                warn!("run cancelled");
                summary.cancelled = true;
            }
        }
        self.cancel.cancel();
    }

    fn finish(&self, mut summary: RunSummary, started: Instant) -> Result<RunSummary, CoreError> {
        summary.registry = self.resolver.stats();
        summary.throttle = self.throttle.as_ref().map(|t| t.stats());
        summary.elapsed = started.elapsed();

        self.enriched.flush()?;
        self.circuits.flush()?;
        self.resolver.cache().flush()?;

        summary.log();
        Ok(summary)
    }

    fn import_extract(&self, summary: &mut RunSummary) {
        let Some(path) = &self.config.extract_path else {
            return;
        };
        match load_extract(path) {
            Ok(report) => {
                let stats = self.circuits.replace_extract(report.records);
                info!(
                    path = %path.display(),
                    imported = stats.imported,
                    replaced = stats.replaced,
                    shadowed_by_manual = stats.shadowed_by_manual,
                    skipped = report.skipped,
                    unreadable = report.unreadable,
                    "circuit extract imported"
                );
                summary.parse_errors += report.unreadable;
                summary.import = Some(stats);
            }
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "extract import failed; keeping previous circuit records"
                );
                summary.extract_failed = true;
            }
        }
    }

    // ── Per site ─────────────────────────────────────────────────────

    async fn process_site(&self, site: &SiteTelemetry) -> Result<SiteReport, CoreError> {
        let mut report = SiteReport::default();

        let parsed = self.normalizer.parse(&site.annotation);
        for issue in &parsed.issues {
            debug!(site = %site.site, slot = %issue.slot, message = %issue.message, "annotation issue");
        }
        report.parse_errors = parsed.issues.len();

        // Prior-run organizations stand in for addresses the registry can't answer.
        let prior = self.enriched.get(&site.site)?;
        let hint = |slot: Slot| {
            site.interface(slot).registry_hint.clone().or_else(|| {
                prior
                    .as_ref()
                    .and_then(|row| row.slot(slot).registry_org.clone())
            })
        };

        let (wan1, wan2) = tokio::join!(
            self.observe(&site.site, Slot::Wan1, &site.wan1, parsed.slot(Slot::Wan1), hint(Slot::Wan1)),
            self.observe(&site.site, Slot::Wan2, &site.wan2, parsed.slot(Slot::Wan2), hint(Slot::Wan2)),
        );
        let (wan1, wan1_resolution) = wan1?;
        let (wan2, wan2_resolution) = wan2?;
        for resolution in [wan1_resolution, wan2_resolution] {
            match resolution {
                Resolution::Private => report.private_addresses += 1,
                Resolution::Failed => report.registry_failures += 1,
                Resolution::Resolved | Resolution::NoAddress => {}
            }
        }
        let observations = [wan1, wan2];
        let candidates = self.circuits.for_site(&site.site);

        let lock = self
            .site_locks
            .entry(site_key(&site.site))
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let mut attempt: u32 = 0;
        loop {
            let previous = self.enriched.get(&site.site)?;
            let outcome = self.reconciler.reconcile(
                &site.site,
                previous.as_ref(),
                &observations,
                &candidates,
                Utc::now(),
            );

            report.transition = Some(outcome.transition);
            report.tiers = outcome.tiers.iter().map(|(_, tier)| *tier).collect();
            report.ambiguities = outcome.ambiguities;
            report.unassigned = outcome.unassigned_candidates;

            if !outcome.needs_write() {
                return Ok(report);
            }

            let changes = outcome.changes.len();
            for change in &outcome.changes {
                debug!(site = %site.site, %change, "field changed");
            }
            match self.enriched.put(outcome.row) {
                Ok(version) => {
                    info!(
                        site = %site.site,
                        transition = %outcome.transition,
                        changes,
                        version,
                        "enriched row written"
                    );
                    report.written = true;
                    return Ok(report);
                }
                Err(CoreError::ConcurrentUpdateConflict { key, expected, found })
                    if attempt < self.config.conflict_retries =>
                {
                    attempt += 1;
                    report.conflicts += 1;
                    warn!(site = %key, expected, found, attempt, "concurrent update; retrying");
                    tokio::time::sleep(self.config.conflict_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn observe(
        &self,
        site: &str,
        slot: Slot,
        interface: &WanInterface,
        notes: &SlotNotes,
        hint: Option<String>,
    ) -> Result<(SlotObservation, Resolution), CoreError> {
        let (registry_org, resolution) = match interface.ip {
            None => (hint, Resolution::NoAddress),
            Some(ip) => self.resolve(site, slot, ip, hint).await?,
        };
        Ok((
            SlotObservation {
                ip: interface.ip,
                provider: notes.provider.clone(),
                speed: notes.speed.clone(),
                registry_org,
            },
            resolution,
        ))
    }

    async fn resolve(
        &self,
        site: &str,
        slot: Slot,
        ip: IpAddr,
        hint: Option<String>,
    ) -> Result<(Option<String>, Resolution), CoreError> {
        match self.resolver.resolve(ip).await {
            Ok(org) => Ok((Some(org), Resolution::Resolved)),
            Err(CoreError::PrivateAddress { .. }) => {
                debug!(site, %slot, %ip, "private address; using registry hint");
                Ok((hint, Resolution::Private))
            }
            Err(CoreError::Cancelled) => Err(CoreError::Cancelled),
            Err(e) => {
                warn!(site, %slot, %ip, error = %e, "registry lookup failed; organization unknown");
                Ok((hint, Resolution::Failed))
            }
        }
    }

    // ── After the pass ───────────────────────────────────────────────

    /// Write confirmed and manual slots back as circuit records where the
    /// extract has no record for that role yet.
    fn sync_confirmed(&self) -> Result<usize, CoreError> {
        let now = Utc::now();
        let mut synced = 0;
        for site in self.enriched.sites()? {
            let Some(row) = self.enriched.get(&site)? else {
                continue;
            };
            for slot in Slot::ALL {
                if let Some(record) = synced_record(&row, slot, now) {
                    if self.circuits.has_extract_role(&row.site, &record.role) {
                        continue;
                    }
                    if self.circuits.upsert_synced(record) {
                        debug!(site = %row.site, %slot, "enriched slot synced to circuits");
                        synced += 1;
                    }
                }
            }
        }
        if synced > 0 {
            info!(synced, "confirmed slots synced to circuit store");
        }
        Ok(synced)
    }

    fn prune(&self, visible: &HashSet<String>) -> Result<usize, CoreError> {
        let mut pruned = 0;
        for site in self.enriched.sites()? {
            if !visible.contains(&site_key(&site)) && self.enriched.remove(&site)? {
                info!(site = %site, "site no longer in telemetry; enriched row removed");
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

fn synced_record(
    row: &EnrichedCircuit,
    slot: Slot,
    now: chrono::DateTime<Utc>,
) -> Option<CircuitRecord> {
    let data = row.slot(slot);
    if !(data.is_confirmed() || data.is_manual()) || data.provider.trim().is_empty() {
        return None;
    }
    Some(CircuitRecord {
        record_number: None,
        site: row.site.clone(),
        role: data.role.clone(),
        provider: data.provider.clone(),
        speed: data.speed.clone(),
        monthly_cost: data.monthly_cost,
        status: CircuitStatus::Enabled,
        ip: data.ip,
        last_seen: Some(now),
        source: RecordSource::EnrichedSync,
    })
}
