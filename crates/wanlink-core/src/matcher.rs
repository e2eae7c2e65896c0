// ── Circuit matcher ──
//
// Pairs a site's two telemetry slots with its authoritative records.
// Tiers run across both slots before the next tier starts, so one slot's
// exact-IP match can never be taken by the other slot's fuzzy match:
//
//   1. exact public IP
//   2. canonicalized provider, greedy by confidence
//   3. positional: exactly one unassigned record of the slot's role left
//
// A record is assigned to at most one slot. Ties go to the record that
// sorts first under `CircuitRecord::tie_break`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::canon::Canonicalizer;
use crate::model::{CircuitRecord, MatchTier, Slot, SlotObservation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Provider matches below this confidence are ignored.
    pub min_confidence: u8,
    /// Provider matches at or above this confidence confirm a slot.
    pub confirm_confidence: u8,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_confidence: 80,
            confirm_confidence: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotAssignment {
    pub record: CircuitRecord,
    pub tier: MatchTier,
    pub confidence: u8,
}

impl SlotAssignment {
    pub fn is_low_confidence(&self) -> bool {
        self.tier == MatchTier::Positional
    }

    /// Whether this assignment is strong enough to confirm a slot.
    pub fn confirms(&self, config: &MatchConfig) -> bool {
        match self.tier {
            MatchTier::ExactIp => true,
            MatchTier::Provider => {
                self.confidence >= config.confirm_confidence && self.record.status.is_enabled()
            }
            MatchTier::Positional => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteMatch {
    pub wan1: Option<SlotAssignment>,
    pub wan2: Option<SlotAssignment>,
    /// Records left over after both slots were considered.
    pub unassigned_candidates: usize,
    /// Decisions that needed the tie-break.
    pub ambiguities: usize,
}

impl SiteMatch {
    pub fn slot(&self, slot: Slot) -> Option<&SlotAssignment> {
        match slot {
            Slot::Wan1 => self.wan1.as_ref(),
            Slot::Wan2 => self.wan2.as_ref(),
        }
    }

    fn set(&mut self, slot: Slot, assignment: SlotAssignment) {
        match slot {
            Slot::Wan1 => self.wan1 = Some(assignment),
            Slot::Wan2 => self.wan2 = Some(assignment),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitMatcher {
    canon: Arc<Canonicalizer>,
    config: MatchConfig,
}

impl CircuitMatcher {
    pub fn new(canon: Arc<Canonicalizer>, config: MatchConfig) -> Self {
        Self { canon, config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canon
    }

    /// Match both slots.
    pub fn match_site(
        &self,
        observations: &[SlotObservation; 2],
        candidates: &[CircuitRecord],
    ) -> SiteMatch {
        self.match_slots(observations, candidates, &Slot::ALL)
    }

    /// Match only `wanted`; the other slot neither receives nor blocks a
    /// record.
    pub fn match_slots(
        &self,
        observations: &[SlotObservation; 2],
        candidates: &[CircuitRecord],
        wanted: &[Slot],
    ) -> SiteMatch {
        let mut ordered: Vec<&CircuitRecord> = candidates.iter().collect();
        ordered.sort_by(|a, b| a.tie_break(b));

        let mut taken = vec![false; ordered.len()];
        let mut result = SiteMatch::default();
        let mut open: Vec<Slot> = wanted.to_vec();
        open.sort();
        open.dedup();

        // Tier 1: exact IP.
        for slot in open.clone() {
            let Some(ip) = observations[slot.index()].ip else {
                continue;
            };
            let hits: Vec<usize> = (0..ordered.len())
                .filter(|&i| !taken[i] && ordered[i].ip == Some(ip))
                .collect();
            if let Some(&first) = hits.first() {
                if hits.len() > 1 {
                    result.ambiguities += 1;
                }
                taken[first] = true;
                open.retain(|s| *s != slot);
                result.set(
                    slot,
                    SlotAssignment {
                        record: ordered[first].clone(),
                        tier: MatchTier::ExactIp,
                        confidence: 100,
                    },
                );
            }
        }

        // Tier 2: provider, best pair first across all open slots.
        let mut pairs: Vec<(u8, bool, usize, Slot)> = Vec::new();
        for &slot in &open {
            let observation = &observations[slot.index()];
            for (i, record) in ordered.iter().enumerate() {
                if taken[i] {
                    continue;
                }
                let confidence = observation
                    .match_names()
                    .map(|name| self.canon.compare(name, &record.provider))
                    .filter(|m| m.matched)
                    .map(|m| m.confidence)
                    .max();
                if let Some(confidence) = confidence.filter(|c| *c >= self.config.min_confidence) {
                    pairs.push((confidence, record.role == slot.default_role(), i, slot));
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.cmp(&a.1))
                .then(a.2.cmp(&b.2))
                .then(a.3.cmp(&b.3))
        });
        for (n, &(confidence, role_fits, i, slot)) in pairs.iter().enumerate() {
            if taken[i] || !open.contains(&slot) {
                continue;
            }
            let tied = pairs[n + 1..].iter().any(|&(c, r, j, s)| {
                s == slot && c == confidence && r == role_fits && !taken[j]
            });
            if tied {
                result.ambiguities += 1;
            }
            taken[i] = true;
            open.retain(|s| *s != slot);
            result.set(
                slot,
                SlotAssignment {
                    record: ordered[i].clone(),
                    tier: MatchTier::Provider,
                    confidence,
                },
            );
        }

        // Tier 3: positional, only for slots that report something.
        for slot in open.clone() {
            let observation = &observations[slot.index()];
            if observation.ip.is_none() && observation.match_names().next().is_none() {
                continue;
            }
            let role = slot.default_role();
            let remaining: Vec<usize> = (0..ordered.len())
                .filter(|&i| !taken[i] && ordered[i].role == role)
                .collect();
            if let [only] = remaining[..] {
                taken[only] = true;
                open.retain(|s| *s != slot);
                debug!(%slot, provider = %ordered[only].provider, "positional match");
                result.set(
                    slot,
                    SlotAssignment {
                        record: ordered[only].clone(),
                        tier: MatchTier::Positional,
                        confidence: 0,
                    },
                );
            }
        }

        result.unassigned_candidates = taken.iter().filter(|t| !**t).count();
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{CircuitRole, CircuitStatus, RecordSource};

    fn matcher() -> CircuitMatcher {
        CircuitMatcher::new(Arc::new(Canonicalizer::default()), MatchConfig::default())
    }

    fn record(role: CircuitRole, provider: &str, ip: Option<&str>) -> CircuitRecord {
        CircuitRecord {
            record_number: None,
            site: "ALB 01".into(),
            role,
            provider: provider.into(),
            speed: "100.0M x 10.0M".into(),
            monthly_cost: Some(100.0),
            status: CircuitStatus::Enabled,
            ip: ip.map(|s| s.parse().unwrap()),
            last_seen: None,
            source: RecordSource::Extract,
        }
    }

    fn obs(ip: Option<&str>, provider: &str) -> SlotObservation {
        SlotObservation {
            ip: ip.map(|s| s.parse().unwrap()),
            provider: provider.into(),
            ..SlotObservation::default()
        }
    }

    #[test]
    fn frontier_matches_frontier_communications() {
        let candidates = [record(CircuitRole::Primary, "Frontier Communications", None)];
        let result = matcher().match_site(&[obs(None, "Frontier"), obs(None, "")], &candidates);

        let wan1 = result.wan1.unwrap();
        assert_eq!(wan1.tier, MatchTier::Provider);
        assert!(wan1.confidence >= MatchConfig::default().min_confidence);
        assert!(result.wan2.is_none());
    }

    #[test]
    fn exact_ip_beats_provider_on_other_slot() {
        // wan2's annotation says Comcast, but wan1's IP is the Comcast record's.
        let candidates = [
            record(CircuitRole::Primary, "Comcast", Some("73.1.1.1")),
            record(CircuitRole::Secondary, "AT&T", None),
        ];
        let result = matcher().match_site(
            &[obs(Some("73.1.1.1"), ""), obs(Some("12.1.1.1"), "Comcast Business")],
            &candidates,
        );

        assert_eq!(result.wan1.as_ref().unwrap().tier, MatchTier::ExactIp);
        assert_eq!(result.wan1.unwrap().record.provider, "Comcast");
        // Nothing matches by name; the lone Secondary is positional.
        let wan2 = result.wan2.unwrap();
        assert_eq!(wan2.tier, MatchTier::Positional);
        assert!(wan2.is_low_confidence());
        assert_eq!(result.unassigned_candidates, 0);
    }

    #[test]
    fn provider_tier_picks_highest_confidence_and_respects_roles() {
        let candidates = [
            record(CircuitRole::Secondary, "AT&T Broadband", None),
            record(CircuitRole::Primary, "Spectrum", None),
        ];
        let result =
            matcher().match_site(&[obs(None, "Charter"), obs(None, "AT&T")], &candidates);

        assert_eq!(result.wan1.unwrap().record.provider, "Spectrum");
        assert_eq!(result.wan2.unwrap().record.provider, "AT&T Broadband");
    }

    #[test]
    fn registry_org_is_used_when_annotation_is_blank() {
        let candidates = [record(CircuitRole::Primary, "Cox Business", None)];
        let mut wan1 = obs(Some("68.1.1.1"), "");
        wan1.registry_org = Some("Cox Communications".into());

        let result = matcher().match_site(&[wan1, obs(None, "")], &candidates);
        let assigned = result.wan1.unwrap();
        assert_eq!(assigned.tier, MatchTier::Provider);
        assert!(assigned.confirms(&MatchConfig::default()));
    }

    #[test]
    fn ties_prefer_enabled_then_most_recent() {
        let mut disabled = record(CircuitRole::Primary, "Comcast", None);
        disabled.status = CircuitStatus::Disabled;
        disabled.last_seen = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single();
        let mut old = record(CircuitRole::Primary, "Comcast", None);
        old.record_number = Some("OLD".into());
        old.last_seen = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).single();
        let mut new = record(CircuitRole::Primary, "Comcast", None);
        new.record_number = Some("NEW".into());
        new.last_seen = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single();

        let result = matcher().match_site(
            &[obs(None, "Comcast"), obs(None, "")],
            &[disabled, old, new],
        );

        assert_eq!(result.wan1.unwrap().record.record_number.as_deref(), Some("NEW"));
        assert_eq!(result.ambiguities, 1);
        assert_eq!(result.unassigned_candidates, 2);
    }

    #[test]
    fn extra_candidates_are_counted_not_assigned() {
        let candidates = [
            record(CircuitRole::Primary, "Comcast", None),
            record(CircuitRole::Secondary, "AT&T", None),
            record(CircuitRole::Other("Backup".into()), "Verizon", None),
        ];
        let result =
            matcher().match_site(&[obs(None, "Comcast"), obs(None, "AT&T")], &candidates);
        assert!(result.wan1.is_some() && result.wan2.is_some());
        assert_eq!(result.unassigned_candidates, 1);
    }

    #[test]
    fn empty_slot_gets_no_positional_match() {
        let candidates = [record(CircuitRole::Secondary, "AT&T", None)];
        let result = matcher().match_site(&[obs(None, ""), obs(None, "")], &candidates);
        assert!(result.wan2.is_none());
    }

    #[test]
    fn match_slots_leaves_other_slot_alone() {
        let candidates = [
            record(CircuitRole::Primary, "Comcast", None),
            record(CircuitRole::Secondary, "AT&T", None),
        ];
        let result = matcher().match_slots(
            &[obs(None, "Comcast"), obs(None, "AT&T")],
            &candidates,
            &[Slot::Wan2],
        );
        assert!(result.wan1.is_none());
        assert_eq!(result.wan2.unwrap().record.provider, "AT&T");
    }

    #[test]
    fn low_confidence_disabled_provider_does_not_confirm() {
        let mut rec = record(CircuitRole::Primary, "Comcast", None);
        rec.status = CircuitStatus::Disabled;
        let assignment = SlotAssignment {
            record: rec,
            tier: MatchTier::Provider,
            confidence: 100,
        };
        assert!(!assignment.confirms(&MatchConfig::default()));
    }
}
