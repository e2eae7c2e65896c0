// wanlink-api: rate-limited async clients for the dashboard and RDAP registries

pub mod client;
pub mod dashboard;
pub mod error;
pub mod rdap;
pub mod throttle;
pub mod transport;

pub use client::{RateLimitedClient, RetryPolicy};
pub use dashboard::DashboardClient;
pub use error::Error;
pub use rdap::RdapClient;
pub use throttle::{AdaptiveThrottle, ThrottleConfig, ThrottleStats};
pub use transport::{TlsMode, TransportConfig};
