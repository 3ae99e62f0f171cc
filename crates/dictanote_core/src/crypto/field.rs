//! Encryption of individual text fields, tolerant of legacy plaintext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use tracing::warn;
use zeroize::Zeroize;

use super::error::{CryptoError, CryptoResult};
use super::kdf::SymmetricKey;

/// Marks a value as produced by `encrypt_field`.
pub const CIPHERTEXT_PREFIX: &str = "enc:v1:";

const ALGORITHM: &str = "aes256gcm";
const SUBKEY_INFO: &[u8] = b"dictanote field subkey v1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// A stored value, discriminated by its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredField<'a> {
    /// Written before encryption was introduced; returned as-is.
    Plaintext(&'a str),
    /// Carries the ciphertext prefix; the payload after it.
    Ciphertext(&'a str),
}

impl<'a> StoredField<'a> {
    pub fn parse(value: &'a str) -> Self {
        match value.strip_prefix(CIPHERTEXT_PREFIX) {
            Some(payload) => StoredField::Ciphertext(payload),
            None => StoredField::Plaintext(value),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, StoredField::Ciphertext(_))
    }
}

/// The decoded parts of a ciphertext payload.
struct CiphertextBlob {
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    sealed: Vec<u8>,
}

impl CiphertextBlob {
    fn decode(payload: &str) -> CryptoResult<Self> {
        let mut parts = payload.split(':');
        let (Some(algorithm), Some(salt), Some(nonce), Some(sealed), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(CryptoError::InvalidFormat("expected 4 segments".into()));
        };

        if algorithm != ALGORITHM {
            return Err(CryptoError::InvalidFormat(format!(
                "unsupported algorithm '{}'",
                algorithm
            )));
        }

        Ok(Self {
            salt: decode_fixed(salt, "salt")?,
            nonce: decode_fixed(nonce, "nonce")?,
            sealed: URL_SAFE_NO_PAD
                .decode(sealed)
                .map_err(|e| CryptoError::InvalidFormat(format!("ciphertext: {}", e)))?,
        })
    }

    fn encode(&self) -> String {
        format!(
            "{}{}:{}:{}:{}",
            CIPHERTEXT_PREFIX,
            ALGORITHM,
            URL_SAFE_NO_PAD.encode(self.salt),
            URL_SAFE_NO_PAD.encode(self.nonce),
            URL_SAFE_NO_PAD.encode(&self.sealed)
        )
    }
}

fn decode_fixed<const N: usize>(segment: &str, what: &str) -> CryptoResult<[u8; N]> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| CryptoError::InvalidFormat(format!("{}: {}", what, e)))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidFormat(format!("{} must be {} bytes", what, N)))
}

fn subkey_cipher(key: &SymmetricKey, salt: &[u8]) -> CryptoResult<Aes256Gcm> {
    let mut subkey = [0u8; 32];
    Hkdf::<Sha256>::new(Some(salt), key.as_bytes())
        .expand(SUBKEY_INFO, &mut subkey)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let cipher = Aes256Gcm::new_from_slice(&subkey);
    subkey.zeroize();
    cipher.map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Encrypt a field with a fresh salt and nonce.
///
/// Two calls with the same input never produce the same output.
pub fn encrypt_field(plaintext: &str, key: &SymmetricKey) -> CryptoResult<String> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);

    let cipher = subkey_cipher(key, &salt).map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| CryptoError::Encryption("AES-GCM encryption failed".into()))?;

    Ok(CiphertextBlob {
        salt,
        nonce,
        sealed,
    }
    .encode())
}

/// How a value was obtained by `read_field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    /// Legacy plaintext passed through.
    Legacy,
    /// Successfully decrypted.
    Decrypted,
    /// Looked encrypted but could not be decrypted; the stored string is returned.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRead {
    pub value: String,
    pub source: FieldSource,
}

/// Strict decryption of a value carrying the ciphertext prefix.
pub fn try_decrypt_field(value: &str, key: &SymmetricKey) -> CryptoResult<String> {
    let StoredField::Ciphertext(payload) = StoredField::parse(value) else {
        return Err(CryptoError::InvalidFormat("missing ciphertext prefix".into()));
    };
    let blob = CiphertextBlob::decode(payload)?;
    let cipher = subkey_cipher(key, &blob.salt)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&blob.nonce), blob.sealed.as_slice())
        .map_err(|_| CryptoError::Decryption("AES-GCM authentication failed".into()))?;
    String::from_utf8(plaintext).map_err(|e| CryptoError::Decryption(e.to_string()))
}

/// Read a stored field for display. Never fails.
///
/// Legacy plaintext is returned unchanged. A value that looks encrypted but
/// does not decrypt under `key` is returned as stored, and a
/// `decryption_fallback` event is logged for later remediation.
pub fn read_field(value: &str, key: &SymmetricKey) -> FieldRead {
    match StoredField::parse(value) {
        StoredField::Plaintext(plain) => FieldRead {
            value: plain.to_string(),
            source: FieldSource::Legacy,
        },
        StoredField::Ciphertext(_) => match try_decrypt_field(value, key) {
            Ok(plain) => FieldRead {
                value: plain,
                source: FieldSource::Decrypted,
            },
            Err(e) => {
                warn!(
                    event = "decryption_fallback",
                    error = %e,
                    "Returning stored value undecrypted"
                );
                FieldRead {
                    value: value.to_string(),
                    source: FieldSource::Fallback,
                }
            }
        },
    }
}

/// Shorthand for `read_field(value, key).value`.
pub fn decrypt_field(value: &str, key: &SymmetricKey) -> String {
    read_field(value, key).value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SymmetricKey {
        SymmetricKey::from_bytes([byte; 32])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let k = key(42);
        for plaintext in ["Dupont", "Müller-Weiss", "O'Brien", "12 rue des Lilas, 75011 Paris"] {
            let encrypted = encrypt_field(plaintext, &k).unwrap();
            assert!(encrypted.starts_with(CIPHERTEXT_PREFIX));
            assert_eq!(decrypt_field(&encrypted, &k), plaintext);
        }
    }

    #[test]
    fn test_encrypt_is_not_deterministic() {
        let k = key(42);
        let a = encrypt_field("Dupont", &k).unwrap();
        let b = encrypt_field("Dupont", &k).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_legacy_plaintext_passes_through() {
        let k = key(42);
        for legacy in ["Dupont", "", "enc:", "enc:v2:aes256gcm:a:b:c", "ENC:V1:something"] {
            let read = read_field(legacy, &k);
            assert_eq!(read.value, legacy);
            assert_eq!(read.source, FieldSource::Legacy);
        }
    }

    #[test]
    fn test_wrong_key_falls_back_to_stored_value() {
        let encrypted = encrypt_field("Dupont", &key(1)).unwrap();
        let read = read_field(&encrypted, &key(2));
        assert_eq!(read.source, FieldSource::Fallback);
        assert_eq!(read.value, encrypted);
        assert_ne!(read.value, "Dupont");
    }

    #[test]
    fn test_tampered_ciphertext_falls_back() {
        let k = key(9);
        let encrypted = encrypt_field("Dupont", &k).unwrap();
        let mut tampered = encrypted.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });

        let read = read_field(&tampered, &k);
        assert_eq!(read.source, FieldSource::Fallback);
        assert_eq!(read.value, tampered);
    }

    #[test]
    fn test_malformed_payload_falls_back() {
        let k = key(9);
        for malformed in [
            "enc:v1:",
            "enc:v1:aes256gcm:abc",
            "enc:v1:rot13:a:b:c",
            "enc:v1:aes256gcm:!!:!!:!!",
        ] {
            let read = read_field(malformed, &k);
            assert_eq!(read.source, FieldSource::Fallback, "{}", malformed);
            assert_eq!(read.value, malformed);
        }
    }

    #[test]
    fn test_try_decrypt_reports_errors() {
        let encrypted = encrypt_field("Dupont", &key(1)).unwrap();
        assert!(matches!(
            try_decrypt_field(&encrypted, &key(2)),
            Err(CryptoError::Decryption(_))
        ));
        assert!(matches!(
            try_decrypt_field("Dupont", &key(1)),
            Err(CryptoError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_stored_field_discrimination() {
        assert_eq!(StoredField::parse("Dupont"), StoredField::Plaintext("Dupont"));
        assert_eq!(
            StoredField::parse("enc:v1:aes256gcm:x:y:z"),
            StoredField::Ciphertext("aes256gcm:x:y:z")
        );
        assert!(StoredField::parse("enc:v1:").is_encrypted());
    }
}
