//! Circuit reconciliation engine between `wanlink-api` and the `wanlink` binary.
//!
//! One nightly pass ties three views of every site's WAN links together:
//! what the edge appliance reports (telemetry and its free-text annotation),
//! who owns each public IP (registry lookups), and what the authoritative
//! circuit extract says is installed. The result is one enriched row per site.
//!
//! - **[`Engine`]** drives the pass: extract import, telemetry snapshot,
//!   bounded per-site concurrency, run timeout, pruning and write-back.
//!
//! - **[`RegistryResolver`]** maps public IPs to organizations through a
//!   read-through [`RegistryCache`] with one in-flight query per address.
//!
//! - **[`NotesNormalizer`]** and **[`Canonicalizer`]** turn annotations and
//!   provider spellings into comparable values.
//!
//! - **[`CircuitMatcher`]** and **[`Reconciler`]** decide which authoritative
//!   record backs each slot and what the next persisted state is.

pub mod canon;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod matcher;
pub mod model;
pub mod notes;
pub mod reconcile;
pub mod registry;
pub mod store;
pub mod summary;
pub mod telemetry;
pub mod text;

// ── Primary re-exports ──────────────────────────────────────────────
pub use canon::{Canonicalizer, MatchRule, ProviderMatch, ProviderTables};
pub use config::{RunConfig, StoreLayout};
pub use engine::Engine;
pub use error::CoreError;
pub use extract::{ExtractReport, load_extract, read_extract};
pub use matcher::{CircuitMatcher, MatchConfig, SiteMatch, SlotAssignment};
pub use notes::{NotesNormalizer, ParsedAnnotation, SlotNotes};
pub use reconcile::{Reconciled, Reconciler, Transition};
pub use registry::{
    CarrierBlock, MemoryRegistryCache, RegistryCache, RegistryLookup, RegistryResolver,
    ResolverConfig, ResolverStats,
};
pub use store::{CircuitTable, EnrichedStore, EnrichedTable, ImportStats};
pub use summary::RunSummary;
pub use telemetry::{DashboardTelemetry, StaticTelemetry, TelemetrySource};

pub use model::{
    CircuitRecord, CircuitRole, CircuitStatus, EnrichedCircuit, EnrichedSlot, MatchTier,
    RecordSource, SiteTelemetry, Slot, SlotObservation, SlotOrigin, SlotState, WanInterface,
};
