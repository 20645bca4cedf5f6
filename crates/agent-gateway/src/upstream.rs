//! Cached, deadline-bounded view of the chain.
//!
//! Every upstream answer is cached per `(network, address)` for the lifetime
//! drawn when the gateway starts. Failures and timeouts are never cached and
//! surface as [`GatewayError::UpstreamUnavailable`], so the pipeline fails
//! closed while the chain is unreachable.

use crate::domain::cache::TtlCache;
use crate::domain::config::Network;
use crate::domain::error::{GatewayError, GatewayResult};
use crate::ports::{ChainClient, PermissionSet, UpstreamError};
use agent_crypto::AgentAddress;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

type ChainKey = (Network, AgentAddress);

pub struct ChainView {
    client: Arc<dyn ChainClient>,
    network: Network,
    timeout: Duration,
    stakes: TtlCache<ChainKey, u128>,
    permissions: TtlCache<ChainKey, PermissionSet>,
}

impl ChainView {
    pub fn new(
        client: Arc<dyn ChainClient>,
        network: Network,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            network,
            timeout,
            stakes: TtlCache::new(ttl),
            permissions: TtlCache::new(ttl),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Lifetime of cached answers.
    pub fn ttl(&self) -> Duration {
        self.stakes.ttl()
    }

    /// Stake of `address`, from cache or upstream.
    pub async fn stake(&self, address: &AgentAddress) -> GatewayResult<u128> {
        self.stakes
            .get_or_refresh((self.network, *address), || {
                self.bounded("get_stake", self.client.get_stake(address))
            })
            .await
    }

    /// Permissions of `address`, from cache or upstream.
    pub async fn permissions(&self, address: &AgentAddress) -> GatewayResult<PermissionSet> {
        self.permissions
            .get_or_refresh((self.network, *address), || {
                self.bounded("get_permissions", self.client.get_permissions(address))
            })
            .await
    }

    async fn bounded<T, F>(&self, query: &'static str, fut: F) -> GatewayResult<T>
    where
        F: Future<Output = Result<T, UpstreamError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(query, error = %e, "Upstream query failed");
                Err(GatewayError::UpstreamUnavailable(e.to_string()))
            }
            Err(_) => {
                warn!(query, timeout_ms = self.timeout.as_millis() as u64, "Upstream query timed out");
                Err(GatewayError::UpstreamUnavailable(format!(
                    "{query} timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StaticChainClient;
    use crate::domain::error::ErrorKind;
    use agent_crypto::AgentKeypair;

    fn setup(ttl_secs: u64) -> (Arc<StaticChainClient>, ChainView, AgentAddress) {
        let client = Arc::new(StaticChainClient::new());
        let address = AgentKeypair::from_seed([9u8; 32]).address();
        client.set_stake(address, 1_000);
        client.grant_permission(address, "inference");
        let view = ChainView::new(
            client.clone(),
            Network::Mainnet,
            Duration::from_secs(ttl_secs),
            Duration::from_secs(1),
        );
        (client, view, address)
    }

    #[tokio::test(start_paused = true)]
    async fn test_stake_cached_until_expiry() {
        let (client, view, address) = setup(600);

        assert_eq!(view.stake(&address).await, Ok(1_000));
        client.set_stake(address, 5);
        assert_eq!(view.stake(&address).await, Ok(1_000));
        assert_eq!(client.stake_queries(), 1);

        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(view.stake(&address).await, Ok(5));
        assert_eq!(client.stake_queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permissions_cached_separately() {
        let (client, view, address) = setup(600);
        let perms = view.permissions(&address).await.unwrap();
        assert!(perms.contains("inference"));
        view.permissions(&address).await.unwrap();
        assert_eq!(client.permission_queries(), 1);
        assert_eq!(client.stake_queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_upstream_unavailable_and_not_cached() {
        let (client, view, address) = setup(600);
        client.set_failing(true);
        let err = view.stake(&address).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);

        client.set_failing(false);
        assert_eq!(view.stake(&address).await, Ok(1_000));
        assert_eq!(client.stake_queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_upstream_times_out() {
        let (client, view, address) = setup(600);
        client.set_latency(Duration::from_secs(5));
        let err = view.stake(&address).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert!(err.to_string().contains("timed out"));
    }
}
