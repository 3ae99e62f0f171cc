//! Field-level encryption for PII at rest.
//!
//! - **Key derivation**: PBKDF2-HMAC-SHA256 over the account's identity and a
//!   fixed application salt (at least 100,000 rounds, 256-bit output).
//! - **Per-field subkey**: HKDF-SHA256 with a fresh random salt per value.
//! - **Cipher**: AES-256-GCM with a fresh random 96-bit nonce per value.
//!
//! ## Stored format
//!
//! ```text
//! enc:v1:aes256gcm:<salt b64url>:<nonce b64url>:<ciphertext+tag b64url>
//! ```
//!
//! Anything without the `enc:v1:` prefix is legacy plaintext and is passed
//! through unchanged on read.

pub mod error;
pub mod field;
pub mod kdf;

pub use error::{CryptoError, CryptoResult};
pub use field::{
    decrypt_field, encrypt_field, read_field, try_decrypt_field, FieldRead, FieldSource,
    StoredField, CIPHERTEXT_PREFIX,
};
pub use kdf::{derive_key, KdfParams, KeyDeriver, SymmetricKey};
