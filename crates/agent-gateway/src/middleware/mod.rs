//! Admission pipeline.
//!
//! Stage order is fixed when the gateway is built:
//!
//! ```text
//! Request → Lists → Signature/Target/Freshness/Permission → RateLimit → Dispatcher
//! ```
//!
//! Any stage may reject; later stages never run for that request. The lists
//! stage only sees the *claimed* sender. The limiter runs after
//! authentication so unauthenticated traffic cannot drain a legitimate
//! sender's bucket.

pub mod auth;
pub mod lists;
pub mod rate_limit;

pub use auth::SignatureVerifier;
pub use lists::{AccessLists, ListVerifier};
pub use rate_limit::{sweep_task, BucketQuota, IpLimiter, RateLimiter, StakeLimiter};

use crate::domain::envelope::RequestEnvelope;
use crate::domain::error::GatewayResult;
use agent_crypto::AgentAddress;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-request state threaded through the stages.
#[derive(Debug)]
pub struct RequestContext {
    pub envelope: RequestEnvelope,
    /// Transport-level address of the caller
    pub peer_ip: IpAddr,
    authenticated: Option<AgentAddress>,
}

impl RequestContext {
    pub fn new(envelope: RequestEnvelope, peer_ip: IpAddr) -> Self {
        Self {
            envelope,
            peer_ip,
            authenticated: None,
        }
    }

    /// Sender whose signature has been verified, if authentication has run.
    pub fn authenticated_sender(&self) -> Option<&AgentAddress> {
        self.authenticated.as_ref()
    }

    pub(crate) fn mark_authenticated(&mut self) {
        self.authenticated = Some(self.envelope.sender);
    }
}

/// One admission stage.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Short stage name for logs.
    fn name(&self) -> &'static str;

    /// Admit the request or reject it.
    async fn check(&self, ctx: &mut RequestContext) -> GatewayResult<()>;
}

/// Ordered, immutable list of stages.
pub struct VerifierChain {
    stages: Vec<Arc<dyn Verifier>>,
}

impl VerifierChain {
    /// The only constructor; argument order is stage order.
    pub fn new(
        lists: ListVerifier,
        auth: SignatureVerifier,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let stages: Vec<Arc<dyn Verifier>> = vec![Arc::new(lists), Arc::new(auth), limiter];
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order, stopping at the first rejection.
    pub async fn run(&self, ctx: &mut RequestContext) -> GatewayResult<()> {
        for stage in &self.stages {
            if let Err(e) = stage.check(ctx).await {
                warn!(
                    stage = stage.name(),
                    kind = %e.kind(),
                    sender = %ctx.envelope.sender,
                    peer = %ctx.peer_ip,
                    "Request rejected"
                );
                return Err(e);
            }
            debug!(stage = stage.name(), "Stage passed");
        }
        Ok(())
    }
}
