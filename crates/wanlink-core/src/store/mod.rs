// ── Persistence ──

mod circuits;
mod enriched;
pub(crate) mod json;

pub use circuits::{CircuitTable, ImportStats};
pub use enriched::{EnrichedStore, EnrichedTable};
