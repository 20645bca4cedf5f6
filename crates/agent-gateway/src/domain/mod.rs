//! Domain types for the gateway.
//!
//! Configuration, errors, the signed envelope and the time-bounded cache.

pub mod cache;
pub mod config;
pub mod envelope;
pub mod error;

// Re-exports for convenience
pub use cache::TtlCache;
pub use config::{
    CacheConfig, ConfigError, GatewayConfig, IpLimiterConfig, LimiterConfig, ListsConfig, Network,
    StakeLimiterConfig,
};
pub use envelope::RequestEnvelope;
pub use error::{ApiError, ErrorBody, ErrorKind, FieldError, GatewayError, GatewayResult, ServiceError};
