//! Error types for cryptographic operations.

use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The identity used as key material was empty.
    #[error("Invalid identity: key material must not be empty")]
    InvalidIdentity,

    /// Key derivation parameters were rejected.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed. Fatal for the write that triggered it.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed - wrong key, corrupted data or tampering.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// The value carries the ciphertext prefix but cannot be parsed.
    #[error("Invalid ciphertext format: {0}")]
    InvalidFormat(String),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
