// ── Core error types ──
//
// Domain errors for the reconciliation engine. Callers never see HTTP
// status codes or JSON parse failures directly; the
// `From<wanlink_api::Error>` impl folds transport-layer errors into the
// taxonomy below.

use std::net::IpAddr;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Outbound calls ───────────────────────────────────────────────
    /// Retryable network failure. Never cached as a permanent negative.
    #[error("Transient network error: {message}")]
    TransientNetwork { message: String },

    /// Non-retryable remote failure (4xx other than rate limiting).
    #[error("Remote API rejected the request (HTTP {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Registry ─────────────────────────────────────────────────────
    /// The registry answered but no usable organization could be derived.
    #[error("Ambiguous registry response for {ip}: {reason}")]
    AmbiguousRegistryResponse { ip: IpAddr, reason: String },

    /// Private or reserved address; must be resolved some other way.
    #[error("{ip} is a private or reserved address")]
    PrivateAddress { ip: IpAddr },

    // ── Data ─────────────────────────────────────────────────────────
    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Circuit extract error: {message}")]
    Extract { message: String },

    // ── Persistence ──────────────────────────────────────────────────
    /// Optimistic version check failed: someone else wrote the row.
    #[error("Concurrent update of {key}: expected version {expected}, found {found}")]
    ConcurrentUpdateConflict {
        key: String,
        expected: u64,
        found: u64,
    },

    /// The persistence store cannot be reached at all. Aborts the run.
    #[error("Store unavailable at {location}: {reason}")]
    StoreUnavailable { location: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// `true` for failures that a later attempt may not repeat.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork { .. }
                | Self::AmbiguousRegistryResponse { .. }
                | Self::ConcurrentUpdateConflict { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<wanlink_api::Error> for CoreError {
    fn from(err: wanlink_api::Error) -> Self {
        use wanlink_api::Error as ApiError;

        if err.is_transient() {
            return CoreError::TransientNetwork {
                message: err.to_string(),
            };
        }

        match err {
            ApiError::InvalidApiKey => CoreError::AuthenticationFailed {
                message: "Invalid API key".into(),
            },
            ApiError::Authentication { message } => CoreError::AuthenticationFailed { message },
            ApiError::Cancelled => CoreError::Cancelled,
            ApiError::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            ApiError::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            ApiError::Api { status, message } => CoreError::Remote { status, message },
            ApiError::Deserialization { message, body: _ } => CoreError::Parse { message },
            ApiError::Transport(e) => CoreError::TransientNetwork {
                message: e.to_string(),
            },
            other @ (ApiError::Timeout { .. }
            | ApiError::RateLimited { .. }
            | ApiError::NotRetryable) => CoreError::Internal(other.to_string()),
        }
    }
}

impl From<csv::Error> for CoreError {
    fn from(err: csv::Error) -> Self {
        CoreError::Extract {
            message: err.to_string(),
        }
    }
}
