//! Central collector of an APM platform: merges agent aggregates, writes them
//! through a throttled storage session and shares cached state across
//! collector nodes.

pub mod aggregate;
pub mod cluster;
pub mod common;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod metrics_server;
pub mod model;
pub mod rate_limiter;
pub mod storage;
pub mod transaction;

pub use config::{CollectorConfig, ConfigError};
pub use rate_limiter::RateLimiter;
