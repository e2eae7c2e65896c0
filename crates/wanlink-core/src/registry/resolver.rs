// ── Registry resolver ──
//
// Public IP → owning organization. Reserved addresses are rejected before
// anything else; known carrier blocks are answered locally; everything
// else goes through the read-through cache and, on a miss, one outbound
// RDAP query per address no matter how many tasks ask at once.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use wanlink_api::RdapClient;
use wanlink_api::rdap::IpNetwork;

use super::cache::{RegistryCache, RegistryCacheEntry};
use super::parse::ResponseInterpreter;
use crate::error::CoreError;

/// The outbound half of a lookup.
pub trait RegistryLookup: Send + Sync {
    fn lookup(
        &self,
        ip: IpAddr,
    ) -> impl Future<Output = Result<IpNetwork, wanlink_api::Error>> + Send;
}

impl RegistryLookup for RdapClient {
    async fn lookup(&self, ip: IpAddr) -> Result<IpNetwork, wanlink_api::Error> {
        self.lookup_ip(ip).await
    }
}

/// An address block that always belongs to one carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierBlock {
    pub net: IpNet,
    pub organization: String,
}

pub fn default_carrier_blocks() -> Vec<CarrierBlock> {
    // 166.80.0.0/16 is a Verizon Business wireless pool that RDAP reports
    // under a reseller more often than not.
    "166.80.0.0/16"
        .parse::<IpNet>()
        .ok()
        .map(|net| CarrierBlock {
            net,
            organization: "Verizon Business".into(),
        })
        .into_iter()
        .collect()
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub carrier_blocks: Vec<CarrierBlock>,
    pub interpreter: ResponseInterpreter,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            carrier_blocks: default_carrier_blocks(),
            interpreter: ResponseInterpreter::default(),
        }
    }
}

/// Point-in-time resolver counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub block_hits: u64,
    pub lookups: u64,
    pub failures: u64,
}

impl ResolverStats {
    /// Fraction of cacheable resolutions answered from the cache.
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    block_hits: AtomicU64,
    lookups: AtomicU64,
    failures: AtomicU64,
}

/// Result shared between every task waiting on the same address.
#[derive(Debug, Clone)]
enum Outcome {
    Found(String),
    Transient(String),
    Ambiguous(String),
    Cancelled,
}

impl Outcome {
    fn into_result(self, ip: IpAddr) -> Result<String, CoreError> {
        match self {
            Self::Found(org) => Ok(org),
            Self::Transient(message) => Err(CoreError::TransientNetwork { message }),
            Self::Ambiguous(reason) => Err(CoreError::AmbiguousRegistryResponse { ip, reason }),
            Self::Cancelled => Err(CoreError::Cancelled),
        }
    }

    fn from_cached(entry: &RegistryCacheEntry) -> Self {
        match (&entry.organization, entry.success) {
            (Some(org), true) => Self::Found(org.clone()),
            _ => Self::Ambiguous(format!(
                "recent lookup failed: {}",
                entry.error.as_deref().unwrap_or("unknown error")
            )),
        }
    }
}

pub struct RegistryResolver<L> {
    lookup: L,
    cache: Arc<dyn RegistryCache>,
    config: ResolverConfig,
    inflight: DashMap<IpAddr, Arc<OnceCell<Outcome>>>,
    counters: Counters,
}

impl<L: RegistryLookup> RegistryResolver<L> {
    pub fn new(lookup: L, cache: Arc<dyn RegistryCache>, config: ResolverConfig) -> Self {
        Self {
            lookup,
            cache,
            config,
            inflight: DashMap::new(),
            counters: Counters::default(),
        }
    }

    pub fn cache(&self) -> &Arc<dyn RegistryCache> {
        &self.cache
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            block_hits: self.counters.block_hits.load(Ordering::Relaxed),
            lookups: self.counters.lookups.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Resolve `ip` to its owning organization.
    ///
    /// Returns [`CoreError::PrivateAddress`] for reserved ranges without
    /// touching the cache or the network.
    pub async fn resolve(&self, ip: IpAddr) -> Result<String, CoreError> {
        if is_reserved(ip) {
            return Err(CoreError::PrivateAddress { ip });
        }

        if let Some(block) = self.config.carrier_blocks.iter().find(|b| b.net.contains(&ip)) {
            self.counters.block_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(block.organization.clone());
        }

        if let Some(entry) = self.fresh_entry(ip) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Outcome::from_cached(&entry).into_result(ip);
        }

        let cell = self
            .inflight
            .entry(ip)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let outcome = cell.get_or_init(|| self.fetch(ip)).await.clone();
        self.inflight.remove_if(&ip, |_, current| Arc::ptr_eq(current, &cell));

        outcome.into_result(ip)
    }

    fn fresh_entry(&self, ip: IpAddr) -> Option<RegistryCacheEntry> {
        self.cache
            .get(ip)
            .filter(|entry| !self.cache.is_stale(entry, Utc::now()))
    }

    async fn fetch(&self, ip: IpAddr) -> Outcome {
        // A flight that finished between our cache check and joining the
        // in-flight map has already stored its answer.
        if let Some(entry) = self.fresh_entry(ip) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Outcome::from_cached(&entry);
        }

        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.counters.lookups.fetch_add(1, Ordering::Relaxed);
        debug!(%ip, "registry lookup");

        let outcome = match self.lookup.lookup(ip).await {
            Ok(network) => match self.config.interpreter.organization(&network) {
                Some(org) => Outcome::Found(org),
                None => Outcome::Ambiguous("response names no organization".into()),
            },
            Err(err) => match CoreError::from(err) {
                CoreError::Cancelled => Outcome::Cancelled,
                CoreError::TransientNetwork { message } => Outcome::Transient(message),
                other => Outcome::Ambiguous(other.to_string()),
            },
        };

        let now = Utc::now();
        match &outcome {
            Outcome::Found(org) => {
                debug!(%ip, organization = %org, "registry resolved");
                self.cache.put(RegistryCacheEntry::success(ip, org.clone(), now));
            }
            Outcome::Transient(reason) | Outcome::Ambiguous(reason) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(%ip, %reason, "registry lookup failed; will retry after retention window");
                self.cache.put(RegistryCacheEntry::failure(ip, reason.clone(), now));
            }
            Outcome::Cancelled => {}
        }
        outcome
    }
}

// ── Reserved ranges ──────────────────────────────────────────────────

/// `true` for addresses no public registry can answer for.
pub fn is_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_reserved_v4(v4),
        IpAddr::V6(v6) => is_reserved_v6(v6),
    }
}

fn is_reserved_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || a == 0
        || a >= 240
        || (a == 100 && (b & 0xc0) == 64)
        || (a == 198 && (b & 0xfe) == 18)
}

fn is_reserved_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_reserved_v4(v4);
    }
    let [first, second, ..] = ip.segments();
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
        || (first == 0x2001 && second == 0x0db8)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use super::*;
    use crate::registry::cache::MemoryRegistryCache;

    type Responder = Box<dyn Fn() -> Result<IpNetwork, wanlink_api::Error> + Send + Sync>;

    struct FakeLookup {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        respond: Responder,
    }

    impl RegistryLookup for FakeLookup {
        async fn lookup(&self, _ip: IpAddr) -> Result<IpNetwork, wanlink_api::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            (self.respond)()
        }
    }

    fn comcast() -> IpNetwork {
        serde_json::from_value(json!({
            "name": "COMCAST-7",
            "entities": [{
                "roles": ["registrant"],
                "vcardArray": ["vcard", [
                    ["fn", {}, "text", "Comcast Cable Communications, LLC"],
                    ["kind", {}, "text", "org"]
                ]]
            }]
        }))
        .unwrap()
    }

    fn build(
        delay: Duration,
        respond: Responder,
    ) -> (RegistryResolver<FakeLookup>, Arc<AtomicUsize>, Arc<MemoryRegistryCache>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(MemoryRegistryCache::new(ChronoDuration::hours(6)));
        let lookup = FakeLookup {
            calls: Arc::clone(&calls),
            delay,
            respond,
        };
        let dyn_cache: Arc<dyn RegistryCache> = cache.clone();
        (
            RegistryResolver::new(lookup, dyn_cache, ResolverConfig::default()),
            calls,
            cache,
        )
    }

    #[tokio::test]
    async fn private_address_never_reaches_lookup() {
        let (resolver, calls, cache) = build(Duration::ZERO, Box::new(|| Ok(comcast())));
        let ip: IpAddr = "192.168.0.1".parse().unwrap();

        let err = resolver.resolve(ip).await.unwrap_err();

        assert!(matches!(err, CoreError::PrivateAddress { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn concurrent_lookups_collapse_to_one_call() {
        let (resolver, calls, _) =
            build(Duration::from_millis(50), Box::new(|| Ok(comcast())));
        let ip: IpAddr = "73.22.1.9".parse().unwrap();

        let (a, b) = tokio::join!(resolver.resolve(ip), resolver.resolve(ip));

        assert_eq!(a.unwrap(), "Comcast");
        assert_eq!(b.unwrap(), "Comcast");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.stats().lookups, 1);
    }

    #[tokio::test]
    async fn success_is_served_from_cache() {
        let (resolver, calls, _) = build(Duration::ZERO, Box::new(|| Ok(comcast())));
        let ip: IpAddr = "73.22.1.9".parse().unwrap();

        resolver.resolve(ip).await.unwrap();
        resolver.resolve(ip).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = resolver.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[tokio::test]
    async fn carrier_block_short_circuits() {
        let (resolver, calls, _) = build(Duration::ZERO, Box::new(|| Ok(comcast())));
        let org = resolver.resolve("166.80.4.20".parse().unwrap()).await.unwrap();
        assert_eq!(org, "Verizon Business");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.stats().block_hits, 1);
    }

    #[tokio::test]
    async fn empty_response_is_ambiguous_and_cached_as_failure() {
        let (resolver, calls, cache) =
            build(Duration::ZERO, Box::new(|| Ok(IpNetwork::default())));
        let ip: IpAddr = "8.8.4.4".parse().unwrap();

        let err = resolver.resolve(ip).await.unwrap_err();
        assert!(matches!(err, CoreError::AmbiguousRegistryResponse { .. }));
        assert!(!cache.get(ip).unwrap().success);

        // Within the retention window the failure short-circuits.
        let again = resolver.resolve(ip).await.unwrap_err();
        assert!(matches!(again, CoreError::AmbiguousRegistryResponse { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_failure_is_retried() {
        let (resolver, calls, cache) = build(Duration::ZERO, Box::new(|| Ok(comcast())));
        let ip: IpAddr = "73.22.1.9".parse().unwrap();
        cache.put(RegistryCacheEntry::failure(
            ip,
            "timeout",
            Utc::now() - ChronoDuration::hours(7),
        ));

        assert_eq!(resolver.resolve(ip).await.unwrap(), "Comcast");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.get(ip).unwrap().success);
    }

    #[tokio::test]
    async fn transient_error_is_retryable_and_cancellation_is_not_cached() {
        let (resolver, _, cache) = build(
            Duration::ZERO,
            Box::new(|| Err(wanlink_api::Error::RateLimited { retry_after_secs: 1 })),
        );
        let ip: IpAddr = "73.22.1.9".parse().unwrap();
        let err = resolver.resolve(ip).await.unwrap_err();
        assert!(matches!(err, CoreError::TransientNetwork { .. }));
        assert!(err.is_retryable());
        assert!(!cache.get(ip).unwrap().success);

        let (resolver, _, cache) =
            build(Duration::ZERO, Box::new(|| Err(wanlink_api::Error::Cancelled)));
        let err = resolver.resolve(ip).await.unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
        assert!(cache.get(ip).is_none());
    }

    #[test]
    fn reserved_ranges() {
        for ip in [
            "10.1.2.3",
            "172.16.0.1",
            "192.168.0.1",
            "127.0.0.1",
            "169.254.1.1",
            "100.64.0.1",
            "100.127.255.255",
            "198.18.0.1",
            "0.1.2.3",
            "240.0.0.1",
            "255.255.255.255",
            "203.0.113.5",
            "fd00::1",
            "fe80::1",
            "::1",
            "2001:db8::1",
            "::ffff:10.0.0.1",
        ] {
            assert!(is_reserved(ip.parse().unwrap()), "{ip}");
        }
        for ip in ["73.22.1.9", "100.128.0.1", "166.80.1.1", "2600:1700::1"] {
            assert!(!is_reserved(ip.parse().unwrap()), "{ip}");
        }
    }
}
