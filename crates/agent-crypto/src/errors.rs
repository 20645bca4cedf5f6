//! Crypto error types.

use thiserror::Error;

/// Identity and signature errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Address is not valid hex of the expected length
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Address decodes but is not a usable Ed25519 verifying key
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Signature is not valid hex of the expected length
    #[error("Invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    /// Signature verification failed
    #[error("Signature verification failed")]
    SignatureVerificationFailed,
}
