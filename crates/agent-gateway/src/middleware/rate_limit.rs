//! Rate limiting stage using `governor` token buckets.
//!
//! Two limiters, exactly one active per gateway:
//!
//! - [`StakeLimiter`]: buckets keyed by authenticated sender. Capacity is
//!   `floor(stake * token_ratio)`, refilled completely over one epoch. Zero
//!   stake means zero capacity, so the sender is always rejected.
//! - [`IpLimiter`]: buckets keyed by caller network address with a fixed
//!   capacity and refill rate.
//!
//! Each key owns a direct (unkeyed) `governor` limiter inside a `DashMap`;
//! one key is serialized under its shard lock while different keys proceed
//! in parallel. Idle buckets are dropped by [`sweep_task`].

use super::{RequestContext, Verifier};
use crate::domain::config::{IpLimiterConfig, LimiterConfig, StakeLimiterConfig, MAX_REFILL_WINDOW};
use crate::domain::error::{GatewayError, GatewayResult};
use crate::upstream::ChainView;
use agent_crypto::AgentAddress;
use async_trait::async_trait;
use dashmap::DashMap;
use governor::{
    clock::Clock,
    middleware::NoOpMiddleware,
    nanos::Nanos,
    state::{InMemoryState, NotKeyed},
    Quota,
};
use std::fmt::Display;
use std::hash::Hash;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// `governor` clock on tokio time, so buckets follow a paused test clock.
#[derive(Debug, Clone)]
struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    type Instant = Nanos;

    fn now(&self) -> Nanos {
        Nanos::from(self.origin.elapsed())
    }
}

type DirectLimiter =
    governor::RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<Nanos>>;

/// Burst capacity of a bucket and the interval at which one token returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketQuota {
    capacity: u32,
    period: Duration,
}

impl BucketQuota {
    pub fn new(capacity: u32, period: Duration) -> Self {
        Self {
            capacity,
            period: period.max(Duration::from_nanos(1)),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// `None` for a zero-capacity bucket.
    fn to_governor(self) -> Option<Quota> {
        let burst = NonZeroU32::new(self.capacity)?;
        Quota::with_period(self.period).map(|quota| quota.allow_burst(burst))
    }
}

/// One key's bucket
struct Bucket {
    quota: BucketQuota,
    /// Absent when the quota has no capacity
    limiter: Option<DirectLimiter>,
    clock: TokioClock,
    last_access: Instant,
}

impl Bucket {
    fn new(quota: BucketQuota) -> Self {
        let clock = TokioClock::new();
        let limiter = quota
            .to_governor()
            .map(|q| DirectLimiter::direct_with_clock(q, &clock));
        Self {
            quota,
            limiter,
            clock,
            last_access: Instant::now(),
        }
    }

    /// Take one token. On rejection, how long until one is available
    /// (`None` if the bucket never refills).
    fn check(&mut self) -> Result<(), Option<Duration>> {
        self.last_access = Instant::now();
        let Some(limiter) = &self.limiter else {
            return Err(None);
        };
        limiter
            .check()
            .map_err(|not_until| Some(not_until.wait_time_from(self.clock.now())))
    }
}

/// Keyed set of token buckets.
struct BucketStore<K> {
    buckets: DashMap<K, Bucket>,
}

impl<K> BucketStore<K>
where
    K: Eq + Hash + Clone + Display,
{
    fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Take one token from `key`'s bucket, creating it first if needed.
    /// A bucket whose quota changed is replaced by a fresh one at the new size.
    fn acquire(&self, key: K, quota: BucketQuota) -> GatewayResult<()> {
        let mut bucket = self.buckets.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, capacity = quota.capacity(), "Creating rate limit bucket");
            Bucket::new(quota)
        });

        if bucket.quota != quota {
            debug!(
                key = %key,
                old = bucket.quota.capacity(),
                new = quota.capacity(),
                "Resizing rate limit bucket"
            );
            *bucket = Bucket::new(quota);
        }

        bucket.check().map_err(|retry_after| {
            let message = match retry_after {
                Some(wait) => format!("{key}, retry after {}ms", wait.as_millis()),
                None => key.to_string(),
            };
            GatewayError::RateLimited(message)
        })
    }

    fn sweep(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|key, bucket| {
            let idle = now.saturating_duration_since(bucket.last_access);
            if idle > max_idle {
                debug!(key = %key, idle_secs = idle.as_secs(), "Removing idle rate limit bucket");
                false
            } else {
                true
            }
        });
        before.saturating_sub(self.buckets.len())
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }

    fn quota(&self, key: &K) -> Option<BucketQuota> {
        self.buckets.get(key).map(|bucket| bucket.quota)
    }
}

/// Stake-weighted limiter.
pub struct StakeLimiter {
    config: StakeLimiterConfig,
    chain: Arc<ChainView>,
    buckets: BucketStore<AgentAddress>,
}

impl StakeLimiter {
    pub fn new(config: StakeLimiterConfig, chain: Arc<ChainView>) -> Self {
        Self {
            config,
            chain,
            buckets: BucketStore::new(),
        }
    }

    /// Quota for a given stake: a full bucket returns over one epoch.
    pub fn bucket_quota(&self, stake: u128) -> BucketQuota {
        let capacity = (stake as f64 * self.config.token_ratio)
            .floor()
            .min(f64::from(u32::MAX)) as u32;
        let period = match capacity {
            0 => self.config.epoch,
            n => self.config.epoch / n,
        };
        BucketQuota::new(capacity, period)
    }

    async fn admit(&self, sender: &AgentAddress) -> GatewayResult<()> {
        // Resolve stake before touching the bucket map; no shard lock across await
        let stake = self.chain.stake(sender).await?;
        self.buckets.acquire(*sender, self.bucket_quota(stake))
    }
}

/// Flat per-address limiter.
pub struct IpLimiter {
    quota: BucketQuota,
    buckets: BucketStore<IpAddr>,
}

impl IpLimiter {
    pub fn new(config: IpLimiterConfig) -> Self {
        let period = Duration::try_from_secs_f64(config.refill_rate.recip())
            .unwrap_or(MAX_REFILL_WINDOW)
            .min(MAX_REFILL_WINDOW);
        Self {
            quota: BucketQuota::new(config.bucket_size, period),
            buckets: BucketStore::new(),
        }
    }

    fn admit(&self, ip: IpAddr) -> GatewayResult<()> {
        self.buckets.acquire(ip, self.quota)
    }
}

/// Third pipeline stage: whichever limiter the configuration selects.
pub enum RateLimiter {
    Stake(StakeLimiter),
    Ip(IpLimiter),
}

impl RateLimiter {
    pub fn from_config(config: &LimiterConfig, chain: Arc<ChainView>) -> Self {
        match config {
            LimiterConfig::Stake(stake) => RateLimiter::Stake(StakeLimiter::new(stake.clone(), chain)),
            LimiterConfig::Ip(ip) => RateLimiter::Ip(IpLimiter::new(ip.clone())),
        }
    }

    /// Drop buckets unused for longer than `max_idle`. Returns how many went.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        match self {
            RateLimiter::Stake(limiter) => limiter.buckets.sweep(max_idle),
            RateLimiter::Ip(limiter) => limiter.buckets.sweep(max_idle),
        }
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        match self {
            RateLimiter::Stake(limiter) => limiter.buckets.len(),
            RateLimiter::Ip(limiter) => limiter.buckets.len(),
        }
    }

    /// Current quota of a sender's bucket (stake limiter only).
    pub fn quota_for_sender(&self, sender: &AgentAddress) -> Option<BucketQuota> {
        match self {
            RateLimiter::Stake(limiter) => limiter.buckets.quota(sender),
            RateLimiter::Ip(_) => None,
        }
    }

    /// Current quota of a network address's bucket (IP limiter only).
    pub fn quota_for_ip(&self, ip: &IpAddr) -> Option<BucketQuota> {
        match self {
            RateLimiter::Stake(_) => None,
            RateLimiter::Ip(limiter) => limiter.buckets.quota(ip),
        }
    }
}

#[async_trait]
impl Verifier for RateLimiter {
    fn name(&self) -> &'static str {
        match self {
            RateLimiter::Stake(_) => "stake_limiter",
            RateLimiter::Ip(_) => "ip_limiter",
        }
    }

    async fn check(&self, ctx: &mut RequestContext) -> GatewayResult<()> {
        match self {
            RateLimiter::Stake(limiter) => {
                let sender = ctx.authenticated_sender().copied().ok_or_else(|| {
                    GatewayError::BadSignature("sender not authenticated".into())
                })?;
                limiter.admit(&sender).await
            }
            RateLimiter::Ip(limiter) => limiter.admit(ctx.peer_ip),
        }
    }
}

/// Background task that periodically drops idle buckets.
pub async fn sweep_task(limiter: Arc<RateLimiter>, interval: Duration, max_idle: Duration) {
    let mut sweep_interval = tokio::time::interval(interval);
    sweep_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        sweep_interval.tick().await;
        let removed = limiter.sweep_idle(max_idle);
        if removed > 0 {
            debug!(removed, remaining = limiter.bucket_count(), "Swept idle rate limit buckets");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StaticChainClient;
    use crate::domain::config::Network;
    use crate::domain::envelope::RequestEnvelope;
    use crate::domain::error::ErrorKind;
    use agent_crypto::AgentKeypair;
    use chrono::Utc;
    use std::net::Ipv4Addr;

    fn server() -> AgentAddress {
        AgentKeypair::from_seed([2u8; 32]).address()
    }

    fn authed_ctx(seed: u8, ip: IpAddr) -> RequestContext {
        let caller = AgentKeypair::from_seed([seed; 32]);
        let envelope = RequestEnvelope::sign(&caller, server(), Utc::now(), "ping", b"{}".to_vec());
        let mut ctx = RequestContext::new(envelope, ip);
        ctx.mark_authenticated();
        ctx
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn stake_limiter(chain: Arc<StaticChainClient>, ratio: f64, epoch_secs: u64) -> RateLimiter {
        let view = Arc::new(ChainView::new(
            chain,
            Network::Mainnet,
            Duration::from_secs(600),
            Duration::from_secs(1),
        ));
        RateLimiter::from_config(
            &LimiterConfig::Stake(StakeLimiterConfig {
                token_ratio: ratio,
                epoch: Duration::from_secs(epoch_secs),
            }),
            view,
        )
    }

    fn ip_limiter(bucket_size: u32, refill_rate: f64) -> RateLimiter {
        let view = Arc::new(ChainView::new(
            Arc::new(StaticChainClient::new()),
            Network::Mainnet,
            Duration::from_secs(600),
            Duration::from_secs(1),
        ));
        RateLimiter::from_config(
            &LimiterConfig::Ip(IpLimiterConfig {
                bucket_size,
                refill_rate,
            }),
            view,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_stake_capacity_and_epoch_refill() {
        let chain = Arc::new(StaticChainClient::new());
        let caller = AgentKeypair::from_seed([1u8; 32]).address();
        chain.set_stake(caller, 5);
        let limiter = stake_limiter(chain, 1.0, 10);

        for _ in 0..5 {
            limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();
        }
        let err = limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);

        // 5 tokens per 10s epoch = one token every 2s
        tokio::time::advance(Duration::from_secs(2)).await;
        limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();
        assert!(limiter.check(&mut authed_ctx(1, ip(1))).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_stake_always_rejected() {
        let chain = Arc::new(StaticChainClient::new());
        let limiter = stake_limiter(chain, 1.0, 800);

        let err = limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(limiter.check(&mut authed_ctx(1, ip(1))).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_ratio_scales_capacity() {
        let chain = Arc::new(StaticChainClient::new());
        let limiter = stake_limiter(chain, 0.5, 800);
        let RateLimiter::Stake(stake) = &limiter else {
            panic!("expected stake limiter");
        };
        assert_eq!(stake.bucket_quota(7).capacity(), 3);
        assert_eq!(
            stake.bucket_quota(1000),
            BucketQuota::new(500, Duration::from_millis(1600))
        );
        assert_eq!(stake.bucket_quota(1).capacity(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stake_buckets_are_per_sender() {
        let chain = Arc::new(StaticChainClient::new());
        for seed in [1u8, 2] {
            chain.set_stake(AgentKeypair::from_seed([seed; 32]).address(), 1);
        }
        let limiter = stake_limiter(chain, 1.0, 800);

        limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();
        assert!(limiter.check(&mut authed_ctx(1, ip(1))).await.is_err());
        limiter.check(&mut authed_ctx(2, ip(1))).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stake_change_resizes_bucket_after_cache_expiry() {
        let chain = Arc::new(StaticChainClient::new());
        let caller = AgentKeypair::from_seed([1u8; 32]).address();
        chain.set_stake(caller, 2);
        let limiter = stake_limiter(chain.clone(), 1.0, 100_000);

        limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();
        limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();
        assert!(limiter.check(&mut authed_ctx(1, ip(1))).await.is_err());

        chain.set_stake(caller, 0);
        tokio::time::advance(Duration::from_secs(601)).await;
        let err = limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(!err.to_string().contains("retry after"));
        assert_eq!(limiter.quota_for_sender(&caller).map(|q| q.capacity()), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stake_limiter_requires_authentication() {
        let chain = Arc::new(StaticChainClient::new());
        let limiter = stake_limiter(chain, 1.0, 800);
        let caller = AgentKeypair::from_seed([1u8; 32]);
        let envelope = RequestEnvelope::sign(&caller, server(), Utc::now(), "ping", Vec::new());
        let mut ctx = RequestContext::new(envelope, ip(1));

        let err = limiter.check(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadSignature);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stake_upstream_failure_fails_closed() {
        let chain = Arc::new(StaticChainClient::new());
        chain.set_stake(AgentKeypair::from_seed([1u8; 32]).address(), 100);
        chain.set_failing(true);
        let limiter = stake_limiter(chain, 1.0, 800);

        let err = limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ip_buckets_independent() {
        let limiter = ip_limiter(15, 1.0);

        for _ in 0..15 {
            limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();
        }
        let err = limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.to_string().contains("10.0.0.1"));

        for _ in 0..15 {
            limiter.check(&mut authed_ctx(1, ip(2))).await.unwrap();
        }
        assert!(limiter.check(&mut authed_ctx(1, ip(2))).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ip_retry_hint() {
        let limiter = ip_limiter(10, 1.0);
        for _ in 0..10 {
            limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();
        }
        let err = limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap_err();
        assert!(err.to_string().contains("retry after 1000ms"), "{err}");

        tokio::time::advance(Duration::from_secs(1)).await;
        limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();
        assert!(limiter.check(&mut authed_ctx(1, ip(1))).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slowest_allowed_refill_rejects_without_panic() {
        let window = MAX_REFILL_WINDOW.as_secs_f64();
        let limiter = ip_limiter(2, 2.0 / window);

        limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();
        limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();
        let err = limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ip_refill() {
        let limiter = ip_limiter(2, 0.5);
        limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();
        limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();
        assert!(limiter.check(&mut authed_ctx(1, ip(1))).await.is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_only_idle_buckets() {
        let limiter = ip_limiter(15, 1.0);
        limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();

        tokio::time::advance(Duration::from_secs(3000)).await;
        limiter.check(&mut authed_ctx(1, ip(2))).await.unwrap();

        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(limiter.sweep_idle(Duration::from_secs(3600)), 1);
        assert_eq!(limiter.bucket_count(), 1);
        assert_eq!(limiter.quota_for_ip(&ip(1)), None);
        assert!(limiter.quota_for_ip(&ip(2)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_runs_periodically() {
        let limiter = Arc::new(ip_limiter(15, 1.0));
        limiter.check(&mut authed_ctx(1, ip(1))).await.unwrap();

        let task = tokio::spawn(sweep_task(
            Arc::clone(&limiter),
            Duration::from_secs(60),
            Duration::from_secs(120),
        ));
        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(limiter.bucket_count(), 0);
        task.abort();
    }
}
