//! CLI error types with miette diagnostics.
//!
//! Maps core and config errors into user-facing errors with help text
//! and a process exit code.

use miette::Diagnostic;
use thiserror::Error;

use wanlink_config::ConfigError;
use wanlink_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const AUTH: i32 = 3;
    pub const STORE: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Authentication ───────────────────────────────────────────────

    #[error("No dashboard API key configured")]
    #[diagnostic(
        code(wanlink::no_credentials),
        help(
            "Set the {env} environment variable, store a key in the system keyring \
             under service 'wanlink' / user 'dashboard/api-key', or set dashboard.api_key."
        )
    )]
    NoCredentials { env: String },

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(wanlink::auth_failed),
        help("Verify the dashboard API key and that it has access to the organization.")
    )]
    AuthFailed { message: String },

    // ── Persistence ──────────────────────────────────────────────────

    #[error("Store unavailable at {location}")]
    #[diagnostic(
        code(wanlink::store_unavailable),
        help("{reason}\nCheck run.store_dir and its permissions. Rows written before the failure are kept.")
    )]
    StoreUnavailable { location: String, reason: String },

    // ── Run outcome ──────────────────────────────────────────────────

    #[error("Run timed out after {seconds}s")]
    #[diagnostic(
        code(wanlink::timeout),
        help("Sites finished before the deadline were written; rerun to continue. Raise run.timeout_secs if this repeats.")
    )]
    Timeout { seconds: u64 },

    #[error("Run cancelled")]
    #[diagnostic(code(wanlink::cancelled))]
    Cancelled,

    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(wanlink::config),
        help("Run `wanlink config show` to see the effective configuration.")
    )]
    Config(ConfigError),

    // ── Everything else ──────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(code(wanlink::core))]
    Core(CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid telemetry snapshot: {0}")]
    #[diagnostic(
        code(wanlink::json),
        help("A snapshot is a JSON array of site telemetry objects.")
    )]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoCredentials { .. } | Self::AuthFailed { .. } => exit_code::AUTH,
            Self::StoreUnavailable { .. } => exit_code::STORE,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::StoreUnavailable { location, reason } => {
                Self::StoreUnavailable { location, reason }
            }
            CoreError::Cancelled => Self::Cancelled,
            other => Self::Core(other),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { env } => Self::NoCredentials { env },
            other => Self::Config(other),
        }
    }
}

impl From<wanlink_api::Error> for CliError {
    fn from(err: wanlink_api::Error) -> Self {
        CoreError::from(err).into()
    }
}
