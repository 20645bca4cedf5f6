//! Signed request envelope.
//!
//! The signature binds the claimed sender to the target server, issuance
//! time, endpoint name and the exact payload bytes. Canonical message:
//!
//! ```text
//! {target_address}\n{unix_seconds}\n{endpoint_name}\n{blake3_hex(payload)}
//! ```

use agent_crypto::{blake3_hex, AgentAddress, AgentKeypair, AgentSignature};
use chrono::{DateTime, SubsecRound, Utc};

/// Header carrying the claimed sender address.
pub const HEADER_KEY: &str = "x-key";
/// Header carrying the target server address.
pub const HEADER_TARGET: &str = "x-target";
/// Header carrying the RFC 3339 issuance time.
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
/// Header carrying the hex signature.
pub const HEADER_SIGNATURE: &str = "x-signature";

/// One inbound call as signed by its sender. Consumed once, never persisted.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub sender: AgentAddress,
    pub target: AgentAddress,
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    /// Raw request body, exactly as signed
    pub payload: Vec<u8>,
    pub signature: AgentSignature,
}

impl RequestEnvelope {
    /// Build and sign an envelope on the caller side.
    pub fn sign(
        keypair: &AgentKeypair,
        target: AgentAddress,
        timestamp: DateTime<Utc>,
        endpoint: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        let endpoint = endpoint.into();
        let payload = payload.into();
        let message = canonical_message(&target, &timestamp, &endpoint, &payload);
        Self {
            sender: keypair.address(),
            target,
            timestamp,
            endpoint,
            payload,
            signature: keypair.sign(&message),
        }
    }

    /// Recompute the bytes the sender must have signed.
    pub fn canonical_message(&self) -> Vec<u8> {
        canonical_message(&self.target, &self.timestamp, &self.endpoint, &self.payload)
    }

    /// Issuance time as covered by the signature, whole seconds.
    pub fn signed_at(&self) -> DateTime<Utc> {
        self.timestamp.trunc_subsecs(0)
    }

    /// Header pairs for carrying this envelope over HTTP.
    pub fn headers(&self) -> [(&'static str, String); 4] {
        [
            (HEADER_KEY, self.sender.to_hex()),
            (HEADER_TARGET, self.target.to_hex()),
            (HEADER_TIMESTAMP, self.timestamp.to_rfc3339()),
            (HEADER_SIGNATURE, self.signature.to_hex()),
        ]
    }
}

fn canonical_message(
    target: &AgentAddress,
    timestamp: &DateTime<Utc>,
    endpoint: &str,
    payload: &[u8],
) -> Vec<u8> {
    format!(
        "{}\n{}\n{}\n{}",
        target.to_hex(),
        timestamp.timestamp(),
        endpoint,
        blake3_hex(payload)
    )
    .into_bytes()
}
