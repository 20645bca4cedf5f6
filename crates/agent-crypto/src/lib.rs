//! # Agent Crypto - Identity and Request Signing Primitives
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `signatures` | Ed25519 | Agent identities, request envelope signatures |
//! | `hashing` | BLAKE3 | Request payload digests |
//!
//! An [`AgentAddress`] is the agent's Ed25519 verifying key, so any address
//! can verify a signature without a lookup.
//!
//! ## Security Properties
//!
//! - **Ed25519**: Deterministic nonces, no RNG dependency when signing
//! - **Addresses**: Rejected at parse time unless they decode to a valid curve point
//! - **Secrets**: Signing key bytes are zeroized on drop

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod hashing;
pub mod signatures;

// Re-exports
pub use errors::CryptoError;
pub use hashing::{blake3_hash, blake3_hex};
pub use signatures::{is_valid_signature, verify, AgentAddress, AgentKeypair, AgentSignature};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
