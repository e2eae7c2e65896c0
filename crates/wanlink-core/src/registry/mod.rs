// ── Public-IP registry resolution ──

mod cache;
mod parse;
mod resolver;

pub use cache::{MemoryRegistryCache, RegistryCache, RegistryCacheEntry};
pub use parse::{ResponseInterpreter, default_company_map};
pub use resolver::{
    CarrierBlock, RegistryLookup, RegistryResolver, ResolverConfig, ResolverStats,
    default_carrier_blocks, is_reserved,
};
