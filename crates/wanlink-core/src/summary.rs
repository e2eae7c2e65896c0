// ── Run summary ──

use std::time::Duration;

use tracing::info;
use wanlink_api::ThrottleStats;

use crate::model::MatchTier;
use crate::reconcile::Transition;
use crate::registry::ResolverStats;
use crate::store::ImportStats;

/// Per-tier assignment counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierCounts {
    pub exact_ip: usize,
    pub provider: usize,
    pub positional: usize,
}

impl TierCounts {
    pub fn record(&mut self, tier: MatchTier) {
        match tier {
            MatchTier::ExactIp => self.exact_ip += 1,
            MatchTier::Provider => self.provider += 1,
            MatchTier::Positional => self.positional += 1,
        }
    }
}

/// Everything one pass did, logged once at the end.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub sites_seen: usize,
    pub sites_excluded: usize,
    pub sites_processed: usize,
    pub sites_failed: usize,
    pub created: usize,
    pub written: usize,
    pub unchanged: usize,
    pub swapped: usize,
    pub reevaluated: usize,
    pub tiers: TierCounts,
    pub parse_errors: usize,
    pub ambiguities: usize,
    pub unassigned_candidates: usize,
    pub private_addresses: usize,
    pub registry_failures: usize,
    pub conflicts_retried: usize,
    pub pruned: usize,
    pub synced: usize,
    pub import: Option<ImportStats>,
    pub extract_failed: bool,
    pub registry: ResolverStats,
    pub throttle: Option<ThrottleStats>,
    pub timed_out: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn record_transition(&mut self, transition: Transition) {
        match transition {
            Transition::New => self.created += 1,
            Transition::Swapped => self.swapped += 1,
            Transition::Reevaluated => self.reevaluated += 1,
            Transition::Steady => {}
        }
    }

    /// Completed without timeout, cancellation or failed sites.
    pub fn is_clean(&self) -> bool {
        !self.timed_out && !self.cancelled && self.sites_failed == 0
    }

    pub fn log(&self) {
        info!(
            sites_seen = self.sites_seen,
            excluded = self.sites_excluded,
            processed = self.sites_processed,
            failed = self.sites_failed,
            created = self.created,
            written = self.written,
            unchanged = self.unchanged,
            swapped = self.swapped,
            reevaluated = self.reevaluated,
            "reconciliation finished"
        );
        info!(
            exact_ip = self.tiers.exact_ip,
            provider = self.tiers.provider,
            positional = self.tiers.positional,
            parse_errors = self.parse_errors,
            ambiguities = self.ambiguities,
            unassigned_candidates = self.unassigned_candidates,
            conflicts_retried = self.conflicts_retried,
            pruned = self.pruned,
            synced = self.synced,
            "match summary"
        );
        info!(
            cache_hits = self.registry.cache_hits,
            cache_misses = self.registry.cache_misses,
            hit_rate = format!("{:.1}%", self.registry.hit_rate() * 100.0),
            block_hits = self.registry.block_hits,
            lookups = self.registry.lookups,
            failures = self.registry_failures,
            private = self.private_addresses,
            "registry summary"
        );
        if let Some(throttle) = &self.throttle {
            info!(
                total_calls = throttle.total_calls,
                rate_limited = throttle.rate_limited,
                delay_ms = duration_ms(throttle.current_delay),
                rate_per_sec = format!("{:.2}", throttle.effective_rate()),
                "rate limiter state"
            );
        }
        info!(
            elapsed_ms = duration_ms(self.elapsed),
            timed_out = self.timed_out,
            cancelled = self.cancelled,
            "run complete"
        );
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_tiers_and_transitions() {
        let mut summary = RunSummary::default();
        summary.tiers.record(MatchTier::ExactIp);
        summary.tiers.record(MatchTier::Positional);
        summary.record_transition(Transition::Swapped);
        summary.record_transition(Transition::Steady);

        assert_eq!(summary.tiers.exact_ip, 1);
        assert_eq!(summary.tiers.positional, 1);
        assert_eq!(summary.swapped, 1);
        assert!(summary.is_clean());

        summary.sites_failed = 1;
        assert!(!summary.is_clean());
    }
}
