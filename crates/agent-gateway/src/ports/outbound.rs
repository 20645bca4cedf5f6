//! Outbound ports for the gateway.

use agent_crypto::AgentAddress;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Permissions an address holds on chain.
pub type PermissionSet = BTreeSet<String>;

/// Failure of an upstream chain query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("chain query {query} failed: {reason}")]
pub struct UpstreamError {
    pub query: &'static str,
    pub reason: String,
}

impl UpstreamError {
    pub fn new(query: &'static str, reason: impl Into<String>) -> Self {
        Self {
            query,
            reason: reason.into(),
        }
    }
}

/// Ledger client supplying economic and permission data.
///
/// Implementations decide which chain they talk to; the gateway only keys
/// its cache by network so mainnet and testnet answers never mix.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Total stake delegated to `address`.
    async fn get_stake(&self, address: &AgentAddress) -> Result<u128, UpstreamError>;

    /// Permissions granted to `address`.
    async fn get_permissions(&self, address: &AgentAddress) -> Result<PermissionSet, UpstreamError>;

    /// Free balance of `address`.
    async fn get_balance(&self, address: &AgentAddress) -> Result<u128, UpstreamError>;
}

/// Wall-clock source for freshness checks.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System time implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
