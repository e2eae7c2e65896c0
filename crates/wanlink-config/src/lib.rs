//! Configuration for the wanlink reconciler.
//!
//! TOML file plus `WANLINK_` environment overrides, API key resolution
//! (env var + keyring + plaintext), and translation into the runtime
//! types `wanlink-api` and `wanlink-core` take.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexMap;
use ipnet::IpNet;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wanlink_api::dashboard::DEFAULT_DASHBOARD_URL;
use wanlink_api::rdap::DEFAULT_RDAP_URL;
use wanlink_api::{RetryPolicy, ThrottleConfig, TlsMode, TransportConfig};
use wanlink_core::canon::KeywordFamily;
use wanlink_core::config::default_exclude_patterns;
use wanlink_core::{
    CarrierBlock, MatchConfig, ProviderTables, ResolverConfig, RunConfig, StoreLayout,
};

const KEYRING_SERVICE: &str = "wanlink";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no dashboard API key: set ${env}, store one in the keyring, or set dashboard.api_key")]
    NoCredentials { env: String },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub dashboard: DashboardSection,
    pub registry: RegistrySection,
    pub throttle: ThrottleSection,
    pub matching: MatchingSection,
    pub run: RunSection,
    pub providers: ProvidersSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DashboardSection {
    pub base_url: String,
    /// Organization name or id.
    pub organization: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// API key (plaintext; prefer the env var or keyring).
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// PEM bundle for a TLS-intercepting proxy.
    pub ca_cert: Option<PathBuf>,
}

impl Default for DashboardSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DASHBOARD_URL.into(),
            organization: None,
            api_key_env: "MERAKI_API_KEY".into(),
            api_key: None,
            timeout_secs: 30,
            ca_cert: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistrySection {
    pub base_url: String,
    /// How long a failed lookup is trusted before it is retried.
    pub failure_retention_hours: u32,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_RDAP_URL.into(),
            failure_retention_hours: 6,
        }
    }
}

/// Limiter and retry settings, in milliseconds unless named otherwise.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleSection {
    pub initial_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub speedup_factor: f64,
    pub success_streak: u32,
    pub cooldown_secs: u64,
    pub stats_interval: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_secs: u64,
}

impl Default for ThrottleSection {
    fn default() -> Self {
        let throttle = ThrottleConfig::default();
        let retry = RetryPolicy::default();
        Self {
            initial_delay_ms: millis(throttle.initial_delay),
            min_delay_ms: millis(throttle.min_delay),
            max_delay_ms: millis(throttle.max_delay),
            backoff_factor: throttle.backoff_factor,
            speedup_factor: throttle.speedup_factor,
            success_streak: throttle.success_streak,
            cooldown_secs: throttle.change_cooldown.as_secs(),
            stats_interval: throttle.stats_interval,
            max_retries: retry.max_retries,
            initial_backoff_ms: millis(retry.initial_backoff),
            max_backoff_secs: retry.max_backoff.as_secs(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MatchingSection {
    pub min_confidence: u8,
    pub confirm_confidence: u8,
    pub fuzzy_threshold: u8,
}

impl Default for MatchingSection {
    fn default() -> Self {
        let matching = MatchConfig::default();
        Self {
            min_confidence: matching.min_confidence,
            confirm_confidence: matching.confirm_confidence,
            fuzzy_threshold: ProviderTables::builtin().fuzzy_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RunSection {
    pub concurrency: usize,
    pub timeout_secs: u64,
    /// Circuit extract CSV imported before matching.
    pub extract_path: Option<PathBuf>,
    /// Directory for the JSON stores; defaults to the platform data dir.
    pub store_dir: Option<PathBuf>,
    pub exclude_patterns: Vec<String>,
    pub prune_missing: bool,
    pub sync_confirmed: bool,
    pub conflict_retries: u32,
}

impl Default for RunSection {
    fn default() -> Self {
        let run = RunConfig::default();
        Self {
            concurrency: run.concurrency,
            timeout_secs: run.run_timeout.as_secs(),
            extract_path: None,
            store_dir: None,
            exclude_patterns: default_exclude_patterns(),
            prune_missing: run.prune_missing,
            sync_confirmed: run.sync_confirmed,
            conflict_retries: run.conflict_retries,
        }
    }
}

/// Additions to the built-in provider tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvidersSection {
    /// Alias phrase → canonical brand.
    pub aliases: IndexMap<String, String>,
    pub families: Vec<KeywordFamily>,
    /// Pairs of carriers that must never fuzzy-match.
    pub guards: Vec<(String, String)>,
    /// CIDR → organization, answered without a registry lookup.
    pub carrier_blocks: IndexMap<String, String>,
}

// ── Config file path ────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "wanlink", "wanlink")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default directory for the JSON stores.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".local/share"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

fn home_fallback(under: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(under);
    p.push("wanlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file, then `WANLINK_` env vars
/// (`WANLINK_RUN__CONCURRENCY=4` sets `run.concurrency`).
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("WANLINK_").ignore(&["config"]).split("__"))
}

/// Load and validate the configuration.
///
/// An explicit `path` must exist; the default location may be absent.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(explicit) if !explicit.is_file() => {
            return Err(ConfigError::NotFound {
                path: explicit.to_path_buf(),
            });
        }
        Some(explicit) => explicit.to_path_buf(),
        None => config_path(),
    };
    let config: Config = figment(&path).extract()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.dashboard.base_url)
            .map_err(|e| invalid("dashboard.base_url", e.to_string()))?;
        url::Url::parse(&self.registry.base_url)
            .map_err(|e| invalid("registry.base_url", e.to_string()))?;

        let t = &self.throttle;
        if t.min_delay_ms > t.max_delay_ms {
            return Err(invalid("throttle.min_delay_ms", "must not exceed max_delay_ms"));
        }
        if t.backoff_factor < 1.0 {
            return Err(invalid("throttle.backoff_factor", "must be at least 1.0"));
        }
        if !(t.speedup_factor > 0.0 && t.speedup_factor <= 1.0) {
            return Err(invalid("throttle.speedup_factor", "must be in (0, 1]"));
        }

        let m = &self.matching;
        if m.confirm_confidence > 100 || m.fuzzy_threshold > 100 {
            return Err(invalid("matching", "confidences are 0-100"));
        }
        if m.min_confidence > m.confirm_confidence {
            return Err(invalid(
                "matching.min_confidence",
                "must not exceed confirm_confidence",
            ));
        }

        if self.run.concurrency == 0 {
            return Err(invalid("run.concurrency", "must be at least 1"));
        }
        if self.run.timeout_secs == 0 {
            return Err(invalid("run.timeout_secs", "must be at least 1"));
        }

        self.carrier_blocks().map(|_| ())
    }

    /// Render as TOML, e.g. to show the effective configuration.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    // ── Translation ─────────────────────────────────────────────────

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: self
                .dashboard
                .ca_cert
                .clone()
                .map_or(TlsMode::System, TlsMode::CustomCa),
            timeout: Duration::from_secs(self.dashboard.timeout_secs),
        }
    }

    pub fn throttle_config(&self) -> ThrottleConfig {
        let t = &self.throttle;
        ThrottleConfig {
            initial_delay: Duration::from_millis(
                t.initial_delay_ms.max(t.min_delay_ms).min(t.max_delay_ms),
            ),
            min_delay: Duration::from_millis(t.min_delay_ms),
            max_delay: Duration::from_millis(t.max_delay_ms),
            backoff_factor: t.backoff_factor,
            speedup_factor: t.speedup_factor,
            success_streak: t.success_streak,
            change_cooldown: Duration::from_secs(t.cooldown_secs),
            stats_interval: t.stats_interval,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.throttle.max_retries,
            initial_backoff: Duration::from_millis(self.throttle.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.throttle.max_backoff_secs),
        }
    }

    /// Built-in tables plus configured additions.
    pub fn provider_tables(&self) -> ProviderTables {
        let mut tables = ProviderTables::builtin();
        tables.extend(
            self.providers
                .aliases
                .iter()
                .map(|(alias, canonical)| (alias.to_lowercase(), canonical.clone())),
            self.providers.families.iter().cloned(),
            self.providers
                .guards
                .iter()
                .map(|(a, b)| (a.to_lowercase(), b.to_lowercase())),
        );
        tables.fuzzy_threshold = self.matching.fuzzy_threshold;
        tables
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            min_confidence: self.matching.min_confidence,
            confirm_confidence: self.matching.confirm_confidence,
        }
    }

    /// Built-in carrier blocks followed by configured ones.
    pub fn carrier_blocks(&self) -> Result<Vec<CarrierBlock>, ConfigError> {
        let mut blocks = ResolverConfig::default().carrier_blocks;
        for (cidr, organization) in &self.providers.carrier_blocks {
            let net: IpNet = cidr
                .trim()
                .parse()
                .map_err(|_| invalid("providers.carrier_blocks", format!("bad CIDR {cidr:?}")))?;
            blocks.push(CarrierBlock {
                net,
                organization: organization.trim().to_owned(),
            });
        }
        Ok(blocks)
    }

    pub fn resolver_config(&self) -> Result<ResolverConfig, ConfigError> {
        Ok(ResolverConfig {
            carrier_blocks: self.carrier_blocks()?,
            ..ResolverConfig::default()
        })
    }

    pub fn failure_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.registry.failure_retention_hours))
    }

    pub fn store_layout(&self) -> StoreLayout {
        StoreLayout::new(self.run.store_dir.clone().unwrap_or_else(data_dir))
    }

    pub fn run_config(&self) -> Result<RunConfig, ConfigError> {
        Ok(RunConfig {
            concurrency: self.run.concurrency,
            run_timeout: Duration::from_secs(self.run.timeout_secs),
            extract_path: self.run.extract_path.clone(),
            exclude_patterns: self.run.exclude_patterns.clone(),
            prune_missing: self.run.prune_missing,
            sync_confirmed: self.run.sync_confirmed,
            conflict_retries: self.run.conflict_retries,
            matching: self.match_config(),
            resolver: self.resolver_config()?,
            ..RunConfig::default()
        })
    }

    pub fn organization(&self) -> Result<&str, ConfigError> {
        self.dashboard
            .organization
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .ok_or_else(|| invalid("dashboard.organization", "not set"))
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the dashboard API key: env var, then keyring, then plaintext.
pub fn resolve_api_key(dashboard: &DashboardSection) -> Result<SecretString, ConfigError> {
    let env_name = dashboard.api_key_env.trim();

    // 1. Named env var
    if !env_name.is_empty() {
        if let Ok(val) = std::env::var(env_name) {
            if !val.trim().is_empty() {
                return Ok(SecretString::from(val));
            }
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, "dashboard/api-key") {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref key) = dashboard.api_key {
        if !key.trim().is_empty() {
            return Ok(SecretString::from(key.clone()));
        }
    }

    Err(ConfigError::NoCredentials {
        env: env_name.to_owned(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn from_toml(text: &str) -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(text))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn defaults_are_valid_and_match_runtime_defaults() {
        let config = from_toml("").unwrap();
        assert_eq!(config.dashboard.api_key_env, "MERAKI_API_KEY");
        assert_eq!(config.throttle_config().initial_delay, ThrottleConfig::default().initial_delay);
        assert_eq!(config.retry_policy().max_retries, RetryPolicy::default().max_retries);

        let run = config.run_config().unwrap();
        assert_eq!(run.concurrency, RunConfig::default().concurrency);
        assert_eq!(run.run_timeout, RunConfig::default().run_timeout);
        assert_eq!(run.exclude_patterns, default_exclude_patterns());
        assert_eq!(config.failure_retention(), chrono::Duration::hours(6));
    }

    #[test]
    fn file_values_override_defaults() {
        let config = from_toml(
            r#"
            [dashboard]
            organization = "Discount Tire"

            [run]
            concurrency = 2
            timeout_secs = 600
            store_dir = "/var/lib/wanlink"
            exclude_patterns = ["lab"]

            [throttle]
            min_delay_ms = 100
            initial_delay_ms = 10

            [matching]
            confirm_confidence = 95
            "#,
        )
        .unwrap();

        assert_eq!(config.organization().unwrap(), "Discount Tire");
        let run = config.run_config().unwrap();
        assert_eq!(run.concurrency, 2);
        assert_eq!(run.run_timeout, Duration::from_secs(600));
        assert!(!run.is_excluded("Voice Gateway"));
        assert_eq!(run.matching.confirm_confidence, 95);
        assert_eq!(
            config.store_layout().enriched(),
            PathBuf::from("/var/lib/wanlink/enriched_circuits.json")
        );
        // Initial delay is clamped into [min, max].
        assert_eq!(config.throttle_config().initial_delay, Duration::from_millis(100));
    }

    #[test]
    fn provider_additions_extend_builtins() {
        let config = from_toml(
            r#"
            [providers]
            aliases = { "Ziply" = "Frontier" }
            guards = [["Cox", "Coxcom Wireless"]]
            carrier_blocks = { "198.51.100.0/24" = "Lumen" }

            [[providers.families]]
            canonical = "Ziply Fiber"
            keywords = ["ziply"]
            "#,
        )
        .unwrap();

        let tables = config.provider_tables();
        assert_eq!(tables.aliases[0], ("ziply".to_owned(), "Frontier".to_owned()));
        assert!(tables.aliases.len() > 1);
        assert!(tables.guards.contains(&("cox".to_owned(), "coxcom wireless".to_owned())));
        assert!(tables.families.iter().any(|f| f.canonical == "Ziply Fiber"));

        let blocks = config.carrier_blocks().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].organization, "Lumen");
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = from_toml("[run]\nconcurrency = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "run.concurrency"));

        let err = from_toml("[matching]\nmin_confidence = 95\nconfirm_confidence = 90").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));

        let err = from_toml("[providers]\ncarrier_blocks = { \"nope\" = \"X\" }").unwrap_err();
        assert!(err.to_string().contains("bad CIDR"));

        let err = from_toml("[dashboard]\nbase_url = \"not a url\"").unwrap_err();
        assert!(err.to_string().contains("dashboard.base_url"));
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            load_config(Some(&missing)),
            Err(ConfigError::NotFound { .. })
        ));

        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[run]\nconcurrency = 3\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().run.concurrency, 3);
    }

    #[test]
    fn rendered_toml_loads_back() {
        let mut config = Config::default();
        config.run.concurrency = 5;
        config.providers.aliases.insert("ziply".into(), "Frontier".into());

        let text = config.to_toml().unwrap();
        assert_eq!(from_toml(&text).unwrap(), config);
    }

    #[test]
    fn plaintext_key_is_the_last_resort() {
        let dashboard = DashboardSection {
            api_key_env: "WANLINK_TEST_KEY_THAT_IS_NEVER_SET".into(),
            api_key: Some("from-config".into()),
            ..DashboardSection::default()
        };
        // A keyring entry, if one exists on this machine, wins.
        let key = resolve_api_key(&dashboard).unwrap();
        assert!(!key.expose_secret().is_empty());

        let without = DashboardSection {
            api_key: None,
            ..dashboard
        };
        if resolve_api_key(&without).is_err() {
            assert_eq!(key.expose_secret(), "from-config");
        }
    }
}
