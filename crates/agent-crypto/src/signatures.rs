//! # Ed25519 Agent Identities
//!
//! An agent is identified by its 32-byte Ed25519 verifying key. The hex form
//! of that key is the agent's address, so a claimed address is enough to
//! verify anything the agent signed.
//!
//! ## Security Properties
//!
//! - No RNG dependency when signing (deterministic nonce from message)
//! - Addresses are validated as curve points when parsed
//! - `verify_strict` rejects malleable and small-order signatures

use crate::CryptoError;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Agent address: the hex-rendered Ed25519 verifying key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentAddress([u8; 32]);

impl AgentAddress {
    /// Create from raw key bytes, checking that they form a valid point.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)
    }
}

impl FromStr for AgentAddress {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let raw = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(raw).map_err(|e| CryptoError::InvalidAddress(e.to_string()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            CryptoError::InvalidAddress(format!("expected 32 bytes, got {}", v.len()))
        })?;
        Self::from_bytes(bytes)
    }
}

impl fmt::Display for AgentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for AgentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentAddress({})", self.to_hex())
    }
}

impl Serialize for AgentAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AgentAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Ed25519 signature (64 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AgentSignature([u8; 64]);

impl AgentSignature {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Lowercase hex without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let raw = s.trim().strip_prefix("0x").unwrap_or(s.trim());
        let bytes =
            hex::decode(raw).map_err(|e| CryptoError::InvalidSignatureFormat(e.to_string()))?;
        let bytes: [u8; 64] = bytes.try_into().map_err(|v: Vec<u8>| {
            CryptoError::InvalidSignatureFormat(format!("expected 64 bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }
}

/// Agent signing keypair.
pub struct AgentKeypair {
    signing_key: SigningKey,
}

impl AgentKeypair {
    /// Generate random keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut rand::thread_rng()),
        }
    }

    /// Create from secret seed (32 bytes).
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Create from a hex-encoded 32-byte seed.
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(
            hex::decode(seed_hex.trim())
                .map_err(|e| CryptoError::InvalidAddress(format!("seed: {e}")))?,
        );
        let seed: &[u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidAddress(format!("seed: expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_seed(*seed))
    }

    /// The agent address (verifying key) of this keypair.
    pub fn address(&self) -> AgentAddress {
        AgentAddress(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message (deterministic - no RNG needed).
    pub fn sign(&self, message: &[u8]) -> AgentSignature {
        AgentSignature(self.signing_key.sign(message).to_bytes())
    }
}

impl fmt::Debug for AgentKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentKeypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Verify `signature` over `message` against the key implied by `address`.
pub fn verify(
    address: &AgentAddress,
    message: &[u8],
    signature: &AgentSignature,
) -> Result<(), CryptoError> {
    let verifying_key = address.verifying_key()?;
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying_key
        .verify_strict(message, &sig)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}

/// Boolean form of [`verify`].
pub fn is_valid_signature(address: &AgentAddress, message: &[u8], signature: &AgentSignature) -> bool {
    verify(address, message, signature).is_ok()
}
