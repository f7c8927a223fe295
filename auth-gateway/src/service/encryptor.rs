//! # Stored-Key Encryption
//!
//! Encryption-at-rest for the third-party credentials users entrust to the
//! service. The cipher is behind a trait so the API-key service doesn't
//! care which one is bound; production uses AES-256-GCM with the key from
//! configuration.
//!
//! ## Ciphertext Layout
//!
//! ```text
//! base64( nonce[12] || ciphertext+tag )
//! ```
//!
//! A fresh random nonce per encryption; the nonce travels with the
//! ciphertext, the key never leaves config.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use shared::errors::ApiError;

/// Length of an AES-GCM nonce in bytes.
const NONCE_LEN: usize = 12;

/// Encryption contract for stored credentials.
pub trait Encryptor: Send + Sync {
    /// Encrypts a plaintext secret; returns transportable ciphertext.
    fn encrypt(&self, plaintext: &str) -> Result<String, ApiError>;

    /// Decrypts ciphertext produced by [`Encryptor::encrypt`].
    fn decrypt(&self, ciphertext: &str) -> Result<String, ApiError>;
}

/// AES-256-GCM production binding.
pub struct AesGcmEncryptor {
    cipher: Aes256Gcm,
}

impl AesGcmEncryptor {
    /// Builds the cipher from a base64-encoded 32-byte key (validated at
    /// startup by the config layer).
    pub fn from_base64_key(encoded_key: &str) -> Result<Self, ApiError> {
        let key_bytes = BASE64.decode(encoded_key).map_err(|_| ApiError::InternalError {
            message: "Stored-key encryption key is not valid base64".to_string(),
        })?;

        if key_bytes.len() != 32 {
            return Err(ApiError::InternalError {
                message: "Stored-key encryption key must be 32 bytes".to_string(),
            });
        }

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }
}

impl Encryptor for AesGcmEncryptor {
    fn encrypt(&self, plaintext: &str) -> Result<String, ApiError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| ApiError::InternalError {
                message: "Stored-key encryption failed".to_string(),
            })?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(combined))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, ApiError> {
        let combined = BASE64.decode(ciphertext).map_err(|_| ApiError::InternalError {
            message: "Stored ciphertext is not valid base64".to_string(),
        })?;

        if combined.len() <= NONCE_LEN {
            return Err(ApiError::InternalError {
                message: "Stored ciphertext is truncated".to_string(),
            });
        }

        let (nonce_bytes, payload) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, payload)
            .map_err(|_| ApiError::InternalError {
                message: "Stored-key decryption failed".to_string(),
            })?;

        String::from_utf8(plaintext).map_err(|_| ApiError::InternalError {
            message: "Decrypted value is not UTF-8".to_string(),
        })
    }
}

impl std::fmt::Debug for AesGcmEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmEncryptor").finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn encryptor() -> AesGcmEncryptor {
        AesGcmEncryptor::from_base64_key(&BASE64.encode([42u8; 32])).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let enc = encryptor();
        let secret = "sk-third-party-credential-value";

        let ciphertext = enc.encrypt(secret).unwrap();
        assert_ne!(ciphertext, secret);
        assert_eq!(enc.decrypt(&ciphertext).unwrap(), secret);
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let enc = encryptor();
        let a = enc.encrypt("same-value").unwrap();
        let b = enc.encrypt("same-value").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails_to_decrypt() {
        let enc = encryptor();
        let other = AesGcmEncryptor::from_base64_key(&BASE64.encode([7u8; 32])).unwrap();

        let ciphertext = enc.encrypt("secret").unwrap();
        assert!(other.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_bad_key_material_rejected() {
        assert!(AesGcmEncryptor::from_base64_key("not-base64!!!").is_err());
        assert!(AesGcmEncryptor::from_base64_key(&BASE64.encode([1u8; 16])).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let enc = encryptor();
        let mut ciphertext = enc.encrypt("secret").unwrap();
        ciphertext.replace_range(10..11, if &ciphertext[10..11] == "A" { "B" } else { "A" });
        assert!(enc.decrypt(&ciphertext).is_err());
    }
}
