//! # PKCE (RFC 7636)
//!
//! Challenge transform and verification for Proof Key for Code Exchange.
//!
//! ```text
//! authorize:   client sends  challenge = S256(verifier)   (stored with code)
//! token:       client sends  verifier
//! verify:      S256(verifier) ==ct== stored challenge  →  exchange proceeds
//! ```
//!
//! The comparison is constant-time; a mismatch fails `invalid_grant` with
//! the description `Invalid code_verifier`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use shared::auth::tokens::constant_time_eq;
use shared::errors::OAuthError;

/// Supported code challenge methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    /// `BASE64URL(SHA256(verifier))` - the default and the only method most
    /// clients should use.
    S256,
    /// `challenge == verifier`. Disabled unless `allow_plain_pkce` is set
    /// AND the client's registration permits it.
    Plain,
}

impl CodeChallengeMethod {
    /// Parses the wire value; absent defaults to S256.
    pub fn parse(value: Option<&str>) -> Result<Self, OAuthError> {
        match value {
            None | Some("S256") => Ok(Self::S256),
            Some("plain") => Ok(Self::Plain),
            Some(other) => Err(OAuthError::invalid_request(format!(
                "Unsupported code_challenge_method '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

/// Computes the challenge a verifier should produce.
pub fn compute_challenge(verifier: &str, method: CodeChallengeMethod) -> String {
    match method {
        CodeChallengeMethod::S256 => {
            let mut hasher = Sha256::new();
            hasher.update(verifier.as_bytes());
            URL_SAFE_NO_PAD.encode(hasher.finalize())
        }
        CodeChallengeMethod::Plain => verifier.to_string(),
    }
}

/// Verifies a presented verifier against the stored challenge.
///
/// # Errors
///
/// `invalid_grant` / `Invalid code_verifier` on mismatch.
pub fn verify_challenge(
    verifier: &str,
    method: CodeChallengeMethod,
    stored_challenge: &str,
) -> Result<(), OAuthError> {
    let computed = compute_challenge(verifier, method);
    if constant_time_eq(&computed, stored_challenge) {
        Ok(())
    } else {
        Err(OAuthError::invalid_grant("Invalid code_verifier"))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B test vector
    const RFC_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const RFC_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_s256_matches_rfc_vector() {
        assert_eq!(
            compute_challenge(RFC_VERIFIER, CodeChallengeMethod::S256),
            RFC_CHALLENGE
        );
    }

    #[test]
    fn test_s256_round_trip() {
        let verifier = "some-high-entropy-verifier-string-43-chars-x";
        let challenge = compute_challenge(verifier, CodeChallengeMethod::S256);
        assert!(verify_challenge(verifier, CodeChallengeMethod::S256, &challenge).is_ok());
    }

    #[test]
    fn test_wrong_verifier_rejected() {
        let challenge = compute_challenge(RFC_VERIFIER, CodeChallengeMethod::S256);
        let err =
            verify_challenge("a-different-verifier", CodeChallengeMethod::S256, &challenge)
                .unwrap_err();
        assert_eq!(err.kind, shared::errors::OAuthErrorKind::InvalidGrant);
        assert_eq!(err.description, "Invalid code_verifier");
    }

    #[test]
    fn test_plain_is_identity() {
        assert_eq!(
            compute_challenge("verbatim", CodeChallengeMethod::Plain),
            "verbatim"
        );
        assert!(verify_challenge("verbatim", CodeChallengeMethod::Plain, "verbatim").is_ok());
        assert!(verify_challenge("other", CodeChallengeMethod::Plain, "verbatim").is_err());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(
            CodeChallengeMethod::parse(None).unwrap(),
            CodeChallengeMethod::S256
        );
        assert_eq!(
            CodeChallengeMethod::parse(Some("S256")).unwrap(),
            CodeChallengeMethod::S256
        );
        assert_eq!(
            CodeChallengeMethod::parse(Some("plain")).unwrap(),
            CodeChallengeMethod::Plain
        );
        assert!(CodeChallengeMethod::parse(Some("S512")).is_err());
    }
}
