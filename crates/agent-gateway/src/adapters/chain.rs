//! In-memory chain client.
//!
//! Serves stake, permission and balance data from a local table. Used by the
//! demo binary and by tests, which also rely on its query counters, optional
//! latency and failure switch.

use crate::ports::{ChainClient, PermissionSet, UpstreamError};
use agent_crypto::AgentAddress;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// On-chain data for one address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountRecord {
    pub stake: u128,
    pub balance: u128,
    pub permissions: PermissionSet,
}

/// Chain client backed by an in-memory table.
#[derive(Debug, Default)]
pub struct StaticChainClient {
    accounts: RwLock<HashMap<AgentAddress, AccountRecord>>,
    latency: RwLock<Duration>,
    failing: AtomicBool,
    stake_queries: AtomicUsize,
    permission_queries: AtomicUsize,
    balance_queries: AtomicUsize,
}

impl StaticChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stake of `address`, creating the record if needed.
    pub fn set_stake(&self, address: AgentAddress, stake: u128) {
        self.accounts.write().entry(address).or_default().stake = stake;
    }

    pub fn set_balance(&self, address: AgentAddress, balance: u128) {
        self.accounts.write().entry(address).or_default().balance = balance;
    }

    pub fn grant_permission(&self, address: AgentAddress, permission: impl Into<String>) {
        self.accounts
            .write()
            .entry(address)
            .or_default()
            .permissions
            .insert(permission.into());
    }

    /// Delay every query by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Make every query fail while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn stake_queries(&self) -> usize {
        self.stake_queries.load(Ordering::SeqCst)
    }

    pub fn permission_queries(&self) -> usize {
        self.permission_queries.load(Ordering::SeqCst)
    }

    pub fn balance_queries(&self) -> usize {
        self.balance_queries.load(Ordering::SeqCst)
    }

    async fn lookup(
        &self,
        query: &'static str,
        counter: &AtomicUsize,
        address: &AgentAddress,
    ) -> Result<AccountRecord, UpstreamError> {
        counter.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(UpstreamError::new(query, "chain unreachable"));
        }

        // Unknown addresses have no stake, balance or permissions
        Ok(self.accounts.read().get(address).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ChainClient for StaticChainClient {
    async fn get_stake(&self, address: &AgentAddress) -> Result<u128, UpstreamError> {
        let record = self.lookup("get_stake", &self.stake_queries, address).await?;
        Ok(record.stake)
    }

    async fn get_permissions(&self, address: &AgentAddress) -> Result<PermissionSet, UpstreamError> {
        let record = self
            .lookup("get_permissions", &self.permission_queries, address)
            .await?;
        Ok(record.permissions)
    }

    async fn get_balance(&self, address: &AgentAddress) -> Result<u128, UpstreamError> {
        let record = self
            .lookup("get_balance", &self.balance_queries, address)
            .await?;
        Ok(record.balance)
    }
}
