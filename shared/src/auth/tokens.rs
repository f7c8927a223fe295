//! # Opaque Credential Material
//!
//! Generation and fast hashing of the opaque values this service mints:
//! authorization codes, access/refresh tokens, device codes, API keys.
//!
//! ## Entropy Contract
//!
//! Every opaque value carries at least 288 bits (36 bytes) of CSPRNG
//! entropy; the standard size here is 48 bytes, base64url-encoded without
//! padding (64 characters). API keys use a display prefix plus a 32-byte
//! suffix (43 characters, 256 bits).
//!
//! ## Hashing Roles
//!
//! | Function | Role |
//! |----------|------|
//! | [`sha256_hex`] | Lookup digest column; also the verification hash for access tokens and API keys |
//! | [`constant_time_eq`] | Digest/challenge comparison without timing leaks |
//!
//! Raw values exist only in memory and in the single response that returns
//! them. Nothing in this module logs its inputs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Byte length of standard opaque credentials (codes, tokens).
pub const OPAQUE_TOKEN_BYTES: usize = 48;

/// Byte length of API-key suffixes.
pub const API_KEY_SUFFIX_BYTES: usize = 32;

/// Generates a standard opaque credential: 48 CSPRNG bytes, base64url
/// without padding.
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates an API key: `{prefix}{43-char-suffix}`.
///
/// The prefix (e.g. `lano_live_`) is plaintext for UI display; the suffix
/// carries the 256 bits of entropy.
pub fn generate_api_key(prefix: &str) -> String {
    let mut bytes = [0u8; API_KEY_SUFFIX_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", prefix, URL_SAFE_NO_PAD.encode(bytes))
}

/// Generates a human-enterable device user code: `XXXX-XXXX` from an
/// unambiguous uppercase alphabet (no `0/O`, no `1/I/L`).
pub fn generate_user_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);

    let chars: Vec<char> = bytes
        .iter()
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect();

    format!(
        "{}-{}",
        chars[..4].iter().collect::<String>(),
        chars[4..].iter().collect::<String>()
    )
}

/// SHA-256 digest of a value, hex-encoded.
///
/// This is the lookup-index hash for slow-hashed credentials and the full
/// verification hash for access tokens and API keys (verified on every
/// request, so the hash must be cheap).
pub fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time equality for digests and PKCE challenges.
///
/// Length differences short-circuit - lengths are public information for
/// these inputs.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_token_length_and_charset() {
        let token = generate_opaque_token();
        // 48 bytes -> 64 base64url chars, no padding
        assert_eq!(token.len(), 64);
        assert!(!token.contains('='));
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_opaque_tokens_unique() {
        assert_ne!(generate_opaque_token(), generate_opaque_token());
    }

    #[test]
    fn test_api_key_shape() {
        let key = generate_api_key("lano_live_");
        assert!(key.starts_with("lano_live_"));
        // 32 bytes -> 43 base64url chars
        assert_eq!(key.len(), "lano_live_".len() + 43);
    }

    #[test]
    fn test_user_code_shape() {
        let code = generate_user_code();
        assert_eq!(code.len(), 9);
        assert_eq!(&code[4..5], "-");
        // No ambiguous characters
        for c in code.chars().filter(|c| *c != '-') {
            assert!(!"01OIL".contains(c), "ambiguous char {c} in {code}");
        }
    }

    #[test]
    fn test_sha256_hex_deterministic() {
        let a = sha256_hex("value");
        let b = sha256_hex("value");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, sha256_hex("other"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("same", "same"));
        assert!(!constant_time_eq("same", "diff"));
        assert!(!constant_time_eq("short", "longer-string"));
    }
}
