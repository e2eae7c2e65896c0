// ── Domain model ──

mod circuit;
mod enriched;
mod site;
mod speed;

pub use circuit::{CircuitRecord, CircuitRole, CircuitStatus, RecordSource};
pub use enriched::{
    EnrichedCircuit, EnrichedSlot, FieldChange, MatchTier, SlotOrigin, SlotState,
};
pub use site::{SiteTelemetry, Slot, SlotObservation, WanInterface, site_key};
pub use speed::{CELLULAR_SENTINEL, SATELLITE_SENTINEL, Speed, normalize_speed};
