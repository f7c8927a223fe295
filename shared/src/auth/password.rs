//! # Slow Hashing with Argon2id
//!
//! Argon2id hashing for the credentials that warrant a memory-hard cost:
//! admin passwords, authorization codes and refresh tokens.
//!
//! ## Two Cost Profiles
//!
//! | Profile | Memory | Iterations | Used for |
//! |---------|--------|------------|----------|
//! | [`PasswordHasher::new`] | 64 MiB | 3 | Admin account passwords |
//! | [`PasswordHasher::credential`] | 16 MiB | 2 | Authorization codes, refresh tokens |
//!
//! Passwords are low-entropy and get the full OWASP-recommended cost.
//! Authorization codes and refresh tokens already carry ≥ 288 bits of CSPRNG
//! entropy; the lighter profile still removes any offline-cracking value
//! from a leaked table while keeping the verify step inside a request
//! budget. Both profiles are configurable through the constructor taking
//! explicit [`Params`].
//!
//! ## Storage Format
//!
//! Hashes are stored in PHC string format, which is self-describing:
//!
//! ```text
//! $argon2id$v=19$m=65536,t=3,p=4$<salt>$<hash>
//! ```
//!
//! Each hash embeds a random salt, so equal inputs produce distinct rows and
//! the hash column cannot be used as a lookup index. Rows that need
//! by-value lookup therefore carry a separate SHA-256 digest column (see
//! [`crate::auth::tokens`]); the Argon2 column remains the verification
//! authority and is compared in constant time.

use crate::errors::ApiError;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

// =============================================================================
// Password Hasher
// =============================================================================

/// Argon2id hashing service.
///
/// `Clone + Send + Sync`; each hash operation generates a fresh random salt.
#[derive(Clone)]
pub struct PasswordHasher {
    /// Pre-configured Argon2 instance
    argon2: Argon2<'static>,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher {
    /// Creates a hasher with OWASP-recommended parameters for passwords.
    ///
    /// 64 MiB memory, 3 iterations, 4 lanes - roughly 100ms per operation
    /// on current server hardware.
    pub fn new() -> Self {
        let params = Params::new(
            64 * 1024, // 64 MiB memory cost
            3,         // iterations (time cost)
            4,         // lanes (parallelism)
            None,      // default output length (32 bytes)
        )
        .expect("Invalid Argon2 params"); // Safe: these params are always valid

        Self::with_params(params)
    }

    /// Creates a hasher with the lighter profile for high-entropy
    /// credentials (authorization codes, refresh tokens).
    pub fn credential() -> Self {
        let params = Params::new(16 * 1024, 2, 1, None).expect("Invalid Argon2 params");
        Self::with_params(params)
    }

    /// Creates a hasher with explicit parameters (the configurable cost
    /// factor knob).
    pub fn with_params(params: Params) -> Self {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        Self { argon2 }
    }

    /// Hashes a secret for storage.
    ///
    /// Returns a PHC-formatted string containing algorithm, version,
    /// parameters, salt and hash.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InternalError` if hashing fails (rare).
    pub fn hash(&self, secret: &str) -> Result<String, ApiError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ApiError::InternalError {
                message: format!("Hashing failed: {}", e),
            })
    }

    /// Verifies a secret against a stored PHC hash.
    ///
    /// The comparison is constant-time; an attacker cannot learn how close
    /// a guess was.
    ///
    /// # Returns
    ///
    /// - `Ok(true)` - secret matches
    /// - `Ok(false)` - secret doesn't match
    /// - `Err(...)` - stored hash is malformed
    pub fn verify(&self, secret: &str, hash: &str) -> Result<bool, ApiError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|e| ApiError::InternalError {
            message: format!("Invalid hash format: {}", e),
        })?;

        match self.argon2.verify_password(secret.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(ApiError::InternalError {
                message: format!("Verification failed: {}", e),
            }),
        }
    }
}

// Implement Debug manually to avoid exposing internal state
impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher").finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_correct_secret() {
        let hasher = PasswordHasher::credential();
        let secret = "opaque-credential-value";

        let hash = hasher.hash(secret).unwrap();

        assert_ne!(hash, secret);
        assert!(hasher.verify(secret, &hash).unwrap());
    }

    #[test]
    fn test_verify_wrong_secret() {
        let hasher = PasswordHasher::credential();
        let hash = hasher.hash("right-value").unwrap();

        assert!(!hasher.verify("wrong-value", &hash).unwrap());
    }

    #[test]
    fn test_different_hashes_for_same_secret() {
        let hasher = PasswordHasher::credential();
        let secret = "same-input";

        let hash1 = hasher.hash(secret).unwrap();
        let hash2 = hasher.hash(secret).unwrap();

        // Random salt makes each hash unique
        assert_ne!(hash1, hash2);
        assert!(hasher.verify(secret, &hash1).unwrap());
        assert!(hasher.verify(secret, &hash2).unwrap());
    }

    #[test]
    fn test_hash_is_phc_format() {
        let hasher = PasswordHasher::credential();
        let hash = hasher.hash("anything").unwrap();
        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn test_malformed_hash_is_error() {
        let hasher = PasswordHasher::credential();
        assert!(hasher.verify("anything", "not-a-phc-string").is_err());
    }
}
