//! Authentication stage.
//!
//! Checks, in order: signature over the canonical message, target equals
//! this server, timestamp freshness, and (when configured) an upstream
//! permission. Only after the signature passes is the sender treated as
//! authenticated.

use super::{RequestContext, Verifier};
use crate::domain::error::{GatewayError, GatewayResult};
use crate::ports::TimeSource;
use crate::upstream::ChainView;
use agent_crypto::AgentAddress;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upstream permission the sender must hold.
pub struct PermissionGate {
    required: String,
    chain: Arc<ChainView>,
}

impl PermissionGate {
    pub fn new(required: impl Into<String>, chain: Arc<ChainView>) -> Self {
        Self {
            required: required.into(),
            chain,
        }
    }

    async fn check(&self, sender: &AgentAddress) -> GatewayResult<()> {
        let permissions = self.chain.permissions(sender).await?;
        if permissions.contains(&self.required) {
            Ok(())
        } else {
            Err(GatewayError::NotPermitted(format!(
                "{sender} lacks permission {}",
                self.required
            )))
        }
    }
}

/// Second pipeline stage.
pub struct SignatureVerifier {
    server: AgentAddress,
    max_staleness: Duration,
    clock: Arc<dyn TimeSource>,
    permission: Option<PermissionGate>,
}

impl SignatureVerifier {
    pub fn new(server: AgentAddress, max_staleness: Duration, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            server,
            max_staleness,
            clock,
            permission: None,
        }
    }

    pub fn with_permission(mut self, gate: PermissionGate) -> Self {
        self.permission = Some(gate);
        self
    }

    fn check_freshness(&self, ctx: &RequestContext) -> GatewayResult<()> {
        // Only whole seconds are signed; any presented fraction is ignored
        let issued = ctx.envelope.signed_at();
        let skew_ms = (self.clock.now() - issued).num_milliseconds().unsigned_abs();
        let max_ms = self.max_staleness.as_millis() as u64;
        if skew_ms > max_ms {
            return Err(GatewayError::StaleRequest(format!(
                "timestamp {} is {}ms from server time, limit {}ms",
                issued.to_rfc3339(),
                skew_ms,
                max_ms
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Verifier for SignatureVerifier {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn check(&self, ctx: &mut RequestContext) -> GatewayResult<()> {
        let envelope = &ctx.envelope;
        agent_crypto::verify(
            &envelope.sender,
            &envelope.canonical_message(),
            &envelope.signature,
        )
        .map_err(|e| GatewayError::BadSignature(e.to_string()))?;

        if envelope.target != self.server {
            return Err(GatewayError::WrongTarget(format!(
                "request addressed to {}, this server is {}",
                envelope.target, self.server
            )));
        }

        self.check_freshness(ctx)?;
        ctx.mark_authenticated();
        debug!(sender = %ctx.envelope.sender, "Sender authenticated");

        if let Some(gate) = &self.permission {
            gate.check(&ctx.envelope.sender).await?;
        }
        Ok(())
    }
}
