// ── Reconciliation writer ──
//
// Decides the next persisted state of one site from its previous row,
// fresh telemetry and the authoritative candidates. Pure: the engine
// owns locking and the actual write.
//
// Per slot: Absent -> Unconfirmed -> Confirmed. A confirmed or manual
// slot is locked; automation only refreshes its IP and registry org.
// When the two public IPs trade places the slots' field-sets are swapped
// whole. When exactly one IP changes that slot loses its confirmation and
// is matched again.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::matcher::{CircuitMatcher, SiteMatch, SlotAssignment};
use crate::model::{
    CircuitRecord, EnrichedCircuit, EnrichedSlot, FieldChange, MatchTier, Slot, SlotObservation,
    SlotState,
};

/// What happened to a site this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Transition {
    /// No previous row.
    New,
    Steady,
    /// Public IPs exchanged between slots.
    Swapped,
    /// At least one slot's IP changed and it was matched again.
    Reevaluated,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub row: EnrichedCircuit,
    pub changes: Vec<FieldChange>,
    pub transition: Transition,
    /// Slots whose IP changed (empty unless `Reevaluated`).
    pub reevaluated: Vec<Slot>,
    /// Tier that produced each slot assigned this run.
    pub tiers: Vec<(Slot, MatchTier)>,
    pub unassigned_candidates: usize,
    pub ambiguities: usize,
}

impl Reconciled {
    /// A new site is always written; an existing one only when it changed.
    pub fn needs_write(&self) -> bool {
        self.transition == Transition::New || !self.changes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    matcher: CircuitMatcher,
}

impl Reconciler {
    pub fn new(matcher: CircuitMatcher) -> Self {
        Self { matcher }
    }

    pub fn matcher(&self) -> &CircuitMatcher {
        &self.matcher
    }

    pub fn reconcile(
        &self,
        site: &str,
        previous: Option<&EnrichedCircuit>,
        observations: &[SlotObservation; 2],
        candidates: &[CircuitRecord],
        now: DateTime<Utc>,
    ) -> Reconciled {
        let before = previous
            .cloned()
            .unwrap_or_else(|| EnrichedCircuit::new(site, now));
        let mut row = before.clone();
        if !site.trim().is_empty() {
            row.site = site.trim().to_owned();
        }

        let mut outcome = Reconciled {
            row: EnrichedCircuit::new(site, now),
            changes: Vec::new(),
            transition: if previous.is_some() {
                Transition::Steady
            } else {
                Transition::New
            },
            reevaluated: Vec::new(),
            tiers: Vec::new(),
            unassigned_candidates: 0,
            ambiguities: 0,
        };

        if is_swap(&before, observations) {
            debug!(site, "wan ips swapped; exchanging slot field-sets");
            row.swap_slots();
            for slot in Slot::ALL {
                refresh_observed(row.slot_mut(slot), &observations[slot.index()]);
            }
            outcome.transition = Transition::Swapped;
        } else {
            for slot in Slot::ALL {
                if ip_changed(before.slot(slot).ip, observations[slot.index()].ip) {
                    outcome.reevaluated.push(slot);
                    let current = row.slot_mut(slot);
                    if current.state == SlotState::Confirmed {
                        debug!(site, %slot, "ip changed; dropping confirmation");
                        current.state = SlotState::Unconfirmed;
                    }
                }
            }
            if !outcome.reevaluated.is_empty() && previous.is_some() {
                outcome.transition = Transition::Reevaluated;
            }
            self.rematch(&mut row, observations, candidates, &mut outcome);
        }

        for slot in Slot::ALL {
            if !before.slot(slot).diff(slot, row.slot(slot)).is_empty() {
                row.slot_mut(slot).updated_at = now;
            }
        }
        outcome.changes = before.diff(&row);
        outcome.row = row;
        outcome
    }

    fn rematch(
        &self,
        row: &mut EnrichedCircuit,
        observations: &[SlotObservation; 2],
        candidates: &[CircuitRecord],
        outcome: &mut Reconciled,
    ) {
        let locked: Vec<Slot> = Slot::ALL
            .into_iter()
            .filter(|&s| row.slot(s).is_confirmed() || row.slot(s).is_manual())
            .collect();
        let open: Vec<Slot> = Slot::ALL
            .into_iter()
            .filter(|s| !locked.contains(s))
            .collect();

        // Records already bound to a locked slot are not up for grabs.
        let canon = self.matcher.canonicalizer();
        let mut pool: Vec<CircuitRecord> = Vec::with_capacity(candidates.len());
        for record in candidates {
            let owner = locked
                .iter()
                .copied()
                .find(|&s| owns(row.slot(s), record, |a, b| canon.compare(a, b).confidence == 100));
            match owner {
                Some(slot) => {
                    let current = row.slot_mut(slot);
                    if current.is_confirmed() && !current.is_manual() {
                        current.monthly_cost = record.monthly_cost;
                    }
                }
                None => pool.push(record.clone()),
            }
        }

        for &slot in &locked {
            refresh_observed(row.slot_mut(slot), &observations[slot.index()]);
        }

        let matched: SiteMatch = self.matcher.match_slots(observations, &pool, &open);
        outcome.unassigned_candidates = matched.unassigned_candidates;
        outcome.ambiguities = matched.ambiguities;

        let config = *self.matcher.config();
        for &slot in &open {
            let observation = &observations[slot.index()];
            let current = row.slot_mut(slot);
            match matched.slot(slot) {
                Some(assignment) => {
                    outcome.tiers.push((slot, assignment.tier));
                    apply_assignment(current, observation, assignment, assignment.confirms(&config));
                }
                None => apply_raw(current, slot, observation, canon),
            }
        }
    }
}

/// `true` when `record` is the one a locked slot is already bound to.
fn owns(slot: &EnrichedSlot, record: &CircuitRecord, same_name: impl Fn(&str, &str) -> bool) -> bool {
    match (&slot.record_number, &record.record_number) {
        (Some(mine), Some(theirs)) => mine == theirs,
        _ => {
            (slot.tier.is_some() || slot.is_manual())
                && slot.role == record.role
                && same_name(&slot.provider, &record.provider)
        }
    }
}

fn is_swap(before: &EnrichedCircuit, observations: &[SlotObservation; 2]) -> bool {
    match (before.wan1.ip, before.wan2.ip) {
        (Some(old1), Some(old2)) if old1 != old2 => {
            observations[0].ip == Some(old2) && observations[1].ip == Some(old1)
        }
        _ => false,
    }
}

/// A slot's IP changed when both runs report one and they differ. An
/// interface that stops reporting keeps its last known address.
fn ip_changed(old: Option<IpAddr>, new: Option<IpAddr>) -> bool {
    matches!((old, new), (Some(a), Some(b)) if a != b)
}

fn refresh_observed(slot: &mut EnrichedSlot, observation: &SlotObservation) {
    if observation.ip.is_some() {
        slot.ip = observation.ip;
    }
    if observation.registry_org.is_some() {
        slot.registry_org.clone_from(&observation.registry_org);
    }
}

fn apply_assignment(
    slot: &mut EnrichedSlot,
    observation: &SlotObservation,
    assignment: &SlotAssignment,
    confirms: bool,
) {
    let record = &assignment.record;
    refresh_observed(slot, observation);
    slot.provider = record.provider.trim().to_owned();
    slot.speed = if record.speed.trim().is_empty() {
        observation.speed.clone()
    } else {
        record.speed.clone()
    };
    slot.monthly_cost = record.monthly_cost;
    slot.role = record.role.clone();
    slot.tier = Some(assignment.tier);
    slot.record_number.clone_from(&record.record_number);
    slot.state = if confirms {
        SlotState::Confirmed
    } else {
        SlotState::Unconfirmed
    };
}

fn apply_raw(
    slot_state: &mut EnrichedSlot,
    slot: Slot,
    observation: &SlotObservation,
    canon: &crate::canon::Canonicalizer,
) {
    refresh_observed(slot_state, observation);
    let provider = if observation.provider.trim().is_empty() {
        observation
            .registry_org
            .as_deref()
            .map(|org| canon.canonical_or_raw(org))
            .unwrap_or_default()
    } else {
        observation.provider.clone()
    };
    let seen = !provider.is_empty() || slot_state.ip.is_some();

    slot_state.provider = provider;
    slot_state.speed.clone_from(&observation.speed);
    slot_state.monthly_cost = None;
    slot_state.role = slot.default_role();
    slot_state.tier = None;
    slot_state.record_number = None;
    slot_state.state = if seen {
        SlotState::Unconfirmed
    } else {
        SlotState::Absent
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::canon::Canonicalizer;
    use crate::matcher::MatchConfig;
    use crate::model::{CircuitRole, CircuitStatus, RecordSource, SlotOrigin};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).single().unwrap()
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(CircuitMatcher::new(
            Arc::new(Canonicalizer::default()),
            MatchConfig::default(),
        ))
    }

    fn record(role: CircuitRole, provider: &str, number: &str) -> CircuitRecord {
        CircuitRecord {
            record_number: Some(number.into()),
            site: "ALB 01".into(),
            role,
            provider: provider.into(),
            speed: "300.0M x 35.0M".into(),
            monthly_cost: Some(120.0),
            status: CircuitStatus::Enabled,
            ip: None,
            last_seen: None,
            source: RecordSource::Extract,
        }
    }

    fn obs(ip: &str, provider: &str) -> SlotObservation {
        SlotObservation {
            ip: Some(ip.parse().unwrap()),
            provider: provider.into(),
            speed: "300.0M x 35.0M".into(),
            registry_org: None,
        }
    }

    fn candidates() -> Vec<CircuitRecord> {
        vec![
            record(CircuitRole::Primary, "Comcast", "C-1"),
            record(CircuitRole::Secondary, "AT&T", "C-2"),
        ]
    }

    fn first_run() -> EnrichedCircuit {
        let out = reconciler().reconcile(
            "ALB 01",
            None,
            &[obs("73.1.1.1", "Comcast"), obs("12.1.1.1", "AT&T")],
            &candidates(),
            now(),
        );
        assert_eq!(out.transition, Transition::New);
        assert!(out.needs_write());
        out.row
    }

    #[test]
    fn first_sighting_confirms_strong_matches() {
        let row = first_run();
        assert_eq!(row.wan1.provider, "Comcast");
        assert_eq!(row.wan1.state, SlotState::Confirmed);
        assert_eq!(row.wan1.record_number.as_deref(), Some("C-1"));
        assert_eq!(row.wan2.provider, "AT&T");
        assert_eq!(row.wan2.role, CircuitRole::Secondary);
        assert!(row.wan2.is_confirmed());
    }

    #[test]
    fn identical_second_run_changes_nothing() {
        let row = first_run();
        let later = now() + Duration::days(1);
        let out = reconciler().reconcile(
            "ALB 01",
            Some(&row),
            &[obs("73.1.1.1", "Comcast"), obs("12.1.1.1", "AT&T")],
            &candidates(),
            later,
        );
        assert_eq!(out.transition, Transition::Steady);
        assert!(out.changes.is_empty());
        assert!(!out.needs_write());
        assert_eq!(out.row.wan1.updated_at, now());
    }

    #[test]
    fn swapped_ips_carry_confirmed_data_across() {
        let row = first_run();
        let out = reconciler().reconcile(
            "ALB 01",
            Some(&row),
            &[obs("12.1.1.1", "AT&T"), obs("73.1.1.1", "Comcast")],
            &candidates(),
            now(),
        );

        assert_eq!(out.transition, Transition::Swapped);
        assert_eq!(out.row.wan1.provider, "AT&T");
        assert!(out.row.wan1.is_confirmed());
        assert_eq!(out.row.wan2.provider, "Comcast");
        assert!(out.row.wan2.is_confirmed());
        assert_eq!(out.row.wan2.role, CircuitRole::Primary);
    }

    #[test]
    fn single_ip_change_rematches_only_that_slot() {
        let row = first_run();
        let cands = vec![
            record(CircuitRole::Primary, "Comcast", "C-1"),
            record(CircuitRole::Secondary, "AT&T", "C-2"),
            record(CircuitRole::Secondary, "Verizon Business", "C-3"),
        ];
        let out = reconciler().reconcile(
            "ALB 01",
            Some(&row),
            &[obs("73.1.1.1", "Comcast"), obs("174.2.2.2", "Verizon")],
            &cands,
            now(),
        );

        assert_eq!(out.transition, Transition::Reevaluated);
        assert_eq!(out.reevaluated, vec![Slot::Wan2]);
        assert_eq!(out.row.wan1, row.wan1);
        assert_eq!(out.row.wan2.provider, "Verizon Business");
        assert_eq!(out.row.wan2.record_number.as_deref(), Some("C-3"));
        assert_eq!(out.row.wan2.ip, Some("174.2.2.2".parse().unwrap()));
        assert!(out.row.wan2.is_confirmed());
        assert_eq!(out.tiers, vec![(Slot::Wan2, MatchTier::Provider)]);
    }

    #[test]
    fn confirmed_slot_is_not_downgraded_by_weaker_telemetry() {
        let row = first_run();
        // Same IP, but the annotation now names a different carrier.
        let out = reconciler().reconcile(
            "ALB 01",
            Some(&row),
            &[obs("73.1.1.1", "Cox"), obs("12.1.1.1", "AT&T")],
            &candidates(),
            now(),
        );
        assert_eq!(out.row.wan1.provider, "Comcast");
        assert!(out.row.wan1.is_confirmed());
        assert!(out.changes.is_empty());
    }

    #[test]
    fn manual_slot_only_refreshes_observed_fields() {
        let mut row = first_run();
        row.wan1.origin = SlotOrigin::Manual;
        row.wan1.state = SlotState::Unconfirmed;
        row.wan1.provider = "Hand Entered Fiber".into();
        row.wan1.record_number = None;
        row.wan1.tier = None;

        let mut wan1 = obs("73.1.1.1", "Comcast");
        wan1.registry_org = Some("Comcast".into());
        let out = reconciler().reconcile(
            "ALB 01",
            Some(&row),
            &[wan1, obs("12.1.1.1", "AT&T")],
            &candidates(),
            now(),
        );

        assert_eq!(out.row.wan1.provider, "Hand Entered Fiber");
        assert_eq!(out.row.wan1.registry_org.as_deref(), Some("Comcast"));
        let fields: Vec<_> = out.changes.iter().map(|c| (c.slot, c.field)).collect();
        assert_eq!(fields, vec![(Slot::Wan1, "registry_org")]);
    }

    #[test]
    fn unmatched_slot_keeps_raw_telemetry() {
        let out = reconciler().reconcile(
            "ALB 01",
            None,
            &[obs("73.1.1.1", "Comcast"), obs("98.1.1.1", "Starlink")],
            &[record(CircuitRole::Primary, "Comcast", "C-1")],
            now(),
        );
        assert_eq!(out.row.wan2.provider, "Starlink");
        assert_eq!(out.row.wan2.role, CircuitRole::Secondary);
        assert_eq!(out.row.wan2.state, SlotState::Unconfirmed);
        assert_eq!(out.row.wan2.tier, None);
    }

    #[test]
    fn unconfirmed_slot_upgrades_when_evidence_arrives() {
        let out = reconciler().reconcile(
            "ALB 01",
            None,
            &[obs("73.1.1.1", "Comcast"), obs("12.1.1.1", "AT&T")],
            &[],
            now(),
        );
        assert_eq!(out.row.wan1.state, SlotState::Unconfirmed);

        let again = reconciler().reconcile(
            "ALB 01",
            Some(&out.row),
            &[obs("73.1.1.1", "Comcast"), obs("12.1.1.1", "AT&T")],
            &candidates(),
            now(),
        );
        assert!(again.row.wan1.is_confirmed());
        assert!(again.row.wan2.is_confirmed());
        assert!(again.changes.iter().any(|c| c.field == "state"));
    }
}
