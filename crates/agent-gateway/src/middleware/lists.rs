//! Allow/deny list gate.
//!
//! Cheap pre-authentication filter on the *claimed* sender and the caller's
//! network address. A spoofed claim can get past this gate, but it cannot get
//! past signature verification, which runs next.

use super::{RequestContext, Verifier};
use crate::domain::config::ListsConfig;
use crate::domain::error::{GatewayError, GatewayResult};
use agent_crypto::AgentAddress;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::info;

/// Shared list contents. Read on every request, written by administrative calls.
#[derive(Debug, Default)]
pub struct AccessLists {
    blacklist: RwLock<HashSet<AgentAddress>>,
    whitelist: RwLock<HashSet<AgentAddress>>,
    ip_blacklist: RwLock<HashSet<IpAddr>>,
}

impl AccessLists {
    pub fn from_config(config: &ListsConfig) -> Self {
        Self {
            blacklist: RwLock::new(config.blacklist.iter().copied().collect()),
            whitelist: RwLock::new(config.whitelist.iter().copied().collect()),
            ip_blacklist: RwLock::new(config.ip_blacklist.iter().copied().collect()),
        }
    }

    /// Returns false if the address was already listed.
    pub fn add_to_blacklist(&self, address: AgentAddress) -> bool {
        let added = self.blacklist.write().insert(address);
        if added {
            info!(address = %address, "Added sender to blacklist");
        }
        added
    }

    /// Returns false if the address was already listed. The first entry
    /// turns the whitelist on for every later request.
    pub fn add_to_whitelist(&self, address: AgentAddress) -> bool {
        let added = self.whitelist.write().insert(address);
        if added {
            info!(address = %address, "Added sender to whitelist");
        }
        added
    }

    /// Returns false if the network address was already listed.
    pub fn add_to_ip_blacklist(&self, ip: IpAddr) -> bool {
        let added = self.ip_blacklist.write().insert(ip);
        if added {
            info!(ip = %ip, "Added network address to blacklist");
        }
        added
    }

    pub fn is_blacklisted(&self, address: &AgentAddress) -> bool {
        self.blacklist.read().contains(address)
    }

    /// Empty whitelist admits everyone.
    pub fn is_whitelisted(&self, address: &AgentAddress) -> bool {
        let whitelist = self.whitelist.read();
        whitelist.is_empty() || whitelist.contains(address)
    }

    pub fn is_ip_blacklisted(&self, ip: &IpAddr) -> bool {
        self.ip_blacklist.read().contains(ip)
    }

    /// Gate a claimed sender arriving from `ip`.
    pub fn check(&self, claimed: &AgentAddress, ip: &IpAddr) -> GatewayResult<()> {
        if self.is_ip_blacklisted(ip) {
            return Err(GatewayError::IpBlacklisted(ip.to_string()));
        }
        if self.is_blacklisted(claimed) {
            return Err(GatewayError::Blacklisted(claimed.to_string()));
        }
        if !self.is_whitelisted(claimed) {
            return Err(GatewayError::NotWhitelisted(claimed.to_string()));
        }
        Ok(())
    }
}

/// First pipeline stage.
pub struct ListVerifier {
    lists: Arc<AccessLists>,
}

impl ListVerifier {
    pub fn new(lists: Arc<AccessLists>) -> Self {
        Self { lists }
    }
}

#[async_trait]
impl Verifier for ListVerifier {
    fn name(&self) -> &'static str {
        "lists"
    }

    async fn check(&self, ctx: &mut RequestContext) -> GatewayResult<()> {
        self.lists.check(&ctx.envelope.sender, &ctx.peer_ip)
    }
}
