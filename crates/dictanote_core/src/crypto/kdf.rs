//! Per-account key derivation using PBKDF2-HMAC-SHA256.
//!
//! The "password" here is an account identifier rather than a user-chosen
//! secret, so brute-force resistance comes from the round count.

use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{CryptoError, CryptoResult};

/// Lowest round count accepted by `derive_key`.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Application salt used when the caller does not supply one. The version
/// suffix lets a future derivation scheme coexist with data encrypted under this one.
pub const DEFAULT_APP_SALT: &[u8] = b"dictanote/field-cipher/v1";

/// PBKDF2 parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// PBKDF2 rounds (default: 100,000).
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: MIN_ITERATIONS,
        }
    }
}

/// 256-bit key wrapper with automatic zeroization on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: [u8; 32],
}

impl SymmetricKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { key: bytes }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 256-bit key from an account identity.
pub fn derive_key(identity: &str, salt: &[u8], params: &KdfParams) -> CryptoResult<SymmetricKey> {
    if identity.trim().is_empty() {
        return Err(CryptoError::InvalidIdentity);
    }
    if params.iterations < MIN_ITERATIONS {
        return Err(CryptoError::KeyDerivation(format!(
            "{} rounds is below the minimum of {}",
            params.iterations, MIN_ITERATIONS
        )));
    }
    if salt.is_empty() {
        return Err(CryptoError::KeyDerivation("salt must not be empty".into()));
    }

    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(identity.as_bytes(), salt, params.iterations, &mut key);

    let derived = SymmetricKey::from_bytes(key);
    key.zeroize();
    Ok(derived)
}

/// Holds the application-wide salt and parameters so call sites only pass the identity.
///
/// Holds no key: every operation derives its own and drops it afterwards.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    app_salt: Vec<u8>,
    params: KdfParams,
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::new(DEFAULT_APP_SALT.to_vec())
    }
}

impl KeyDeriver {
    pub fn new(app_salt: impl Into<Vec<u8>>) -> Self {
        Self {
            app_salt: app_salt.into(),
            params: KdfParams::default(),
        }
    }

    pub fn with_params(mut self, params: KdfParams) -> Self {
        self.params = params;
        self
    }

    /// Derive the key for `identity`, using `salt` instead of the application salt when given.
    pub fn derive_key(&self, identity: &str, salt: Option<&[u8]>) -> CryptoResult<SymmetricKey> {
        derive_key(identity, salt.unwrap_or(&self.app_salt), &self.params)
    }
}
