//! Gateway configuration with validation.

use agent_crypto::AgentAddress;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Longest time an empty bucket may take to refill completely.
pub const MAX_REFILL_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listen address
    pub bind: SocketAddr,
    /// Maximum tolerated |now - envelope timestamp|
    #[serde(with = "humantime_serde")]
    pub max_request_staleness: Duration,
    /// Deadline for the whole pipeline including the handler
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Deadline for a single upstream chain query
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
    /// Upstream cache lifetime bounds
    pub cache: CacheConfig,
    /// Allow/deny lists
    pub lists: ListsConfig,
    /// Active rate limiter
    pub limiter: LimiterConfig,
    /// Permission the sender must hold upstream (None = no permission gating)
    pub required_permission: Option<String>,
    /// Which chain upstream queries target
    pub network: Network,
    /// Buckets idle longer than this are evicted
    #[serde(with = "humantime_serde")]
    pub bucket_idle_eviction: Duration,
    /// How often idle buckets are swept
    #[serde(with = "humantime_serde")]
    pub bucket_sweep_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000),
            max_request_staleness: Duration::from_secs(120),
            request_timeout: Duration::from_secs(30),
            upstream_timeout: Duration::from_secs(10),
            max_body_size: 1024 * 1024, // 1MB
            cache: CacheConfig::default(),
            lists: ListsConfig::default(),
            limiter: LimiterConfig::default(),
            required_permission: None,
            network: Network::Mainnet,
            bucket_idle_eviction: Duration::from_secs(3600),
            bucket_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.lower_ttl > self.cache.upper_ttl {
            return Err(ConfigError::InvalidCacheTtl {
                lower: self.cache.lower_ttl,
                upper: self.cache.upper_ttl,
            });
        }

        if self.max_request_staleness.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "max_request_staleness cannot be 0".into(),
            ));
        }

        if self.request_timeout.is_zero() || self.upstream_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "request and upstream timeouts cannot be 0".into(),
            ));
        }

        if self.max_body_size == 0 {
            return Err(ConfigError::InvalidLimit("max_body_size cannot be 0".into()));
        }

        if self.bucket_sweep_interval.is_zero() {
            return Err(ConfigError::InvalidLimit(
                "bucket_sweep_interval cannot be 0".into(),
            ));
        }

        self.limiter.validate()
    }
}

/// Chain the upstream client queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

/// Upstream cache lifetime bounds. One lifetime is drawn uniformly from
/// `[lower_ttl, upper_ttl]` per gateway instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(with = "humantime_serde")]
    pub lower_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub upper_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lower_ttl: Duration::from_secs(600),
            upper_ttl: Duration::from_secs(700),
        }
    }
}

/// Initial list contents. Lists can grow at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListsConfig {
    /// Senders always rejected
    pub blacklist: Vec<AgentAddress>,
    /// When non-empty, only these senders are admitted
    pub whitelist: Vec<AgentAddress>,
    /// Network addresses always rejected
    pub ip_blacklist: Vec<IpAddr>,
}

/// Rate limiter selection. Exactly one is active per gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimiterConfig {
    /// Buckets keyed by authenticated sender, sized by upstream stake
    Stake(StakeLimiterConfig),
    /// Buckets keyed by caller network address, fixed size
    Ip(IpLimiterConfig),
}

impl Default for LimiterConfig {
    fn default() -> Self {
        LimiterConfig::Stake(StakeLimiterConfig::default())
    }
}

impl LimiterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            LimiterConfig::Stake(stake) => {
                if !(stake.token_ratio.is_finite() && stake.token_ratio > 0.0) {
                    return Err(ConfigError::InvalidRateLimit(
                        "token_ratio must be positive".into(),
                    ));
                }
                if stake.epoch.is_zero() || stake.epoch > MAX_REFILL_WINDOW {
                    return Err(ConfigError::InvalidRateLimit(format!(
                        "epoch must be between 1s and {}s",
                        MAX_REFILL_WINDOW.as_secs()
                    )));
                }
            }
            LimiterConfig::Ip(ip) => {
                if ip.bucket_size == 0 {
                    return Err(ConfigError::InvalidRateLimit(
                        "bucket_size cannot be 0".into(),
                    ));
                }
                if !(ip.refill_rate.is_finite() && ip.refill_rate > 0.0) {
                    return Err(ConfigError::InvalidRateLimit(
                        "refill_rate must be positive".into(),
                    ));
                }
                let refill_secs = f64::from(ip.bucket_size) / ip.refill_rate;
                if refill_secs > MAX_REFILL_WINDOW.as_secs_f64() {
                    return Err(ConfigError::InvalidRateLimit(format!(
                        "bucket of {} at {}/s takes longer than {}s to refill",
                        ip.bucket_size,
                        ip.refill_rate,
                        MAX_REFILL_WINDOW.as_secs()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Stake-weighted limiter: capacity = stake * token_ratio, refilled over one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StakeLimiterConfig {
    /// Tokens granted per unit of stake
    pub token_ratio: f64,
    /// Time for an empty bucket to refill completely
    #[serde(with = "humantime_serde")]
    pub epoch: Duration,
}

impl Default for StakeLimiterConfig {
    fn default() -> Self {
        Self {
            token_ratio: 1.0,
            epoch: Duration::from_secs(800),
        }
    }
}

/// Address-weighted limiter: flat bucket per network address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpLimiterConfig {
    /// Bucket capacity
    pub bucket_size: u32,
    /// Tokens added per second
    pub refill_rate: f64,
}

impl Default for IpLimiterConfig {
    fn default() -> Self {
        Self {
            bucket_size: 15,
            refill_rate: 1.0,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Cache lifetime bounds are inverted
    #[error("invalid cache ttl: lower {lower:?} exceeds upper {upper:?}")]
    InvalidCacheTtl { lower: Duration, upper: Duration },
    /// Invalid rate limiting configuration
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Two endpoints registered under one name
    #[error("duplicate endpoint: {0}")]
    DuplicateEndpoint(String),
    /// Endpoint name unusable as a path segment
    #[error("invalid endpoint name: {0:?}")]
    InvalidEndpointName(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" before "s" and "m": both are suffixes of it
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
