//! # Request Validation Helpers
//!
//! Utilities for validating incoming request data using the `validator` crate.
//!
//! ## How Validation Works
//!
//! DTOs derive `Validate` and declare their rules; handlers call
//! [`validate_request`] before touching the service layer:
//!
//! ```rust,ignore
//! use validator::Validate;
//!
//! #[derive(Validate)]
//! struct AuthorizeQuery {
//!     #[validate(length(min = 1, max = 255))]
//!     client_id: String,
//!
//!     #[validate(custom(function = "validators::valid_code_challenge"))]
//!     code_challenge: String,
//! }
//! ```
//!
//! When validation fails the API returns a 400 with field-level details
//! under the `VALIDATION_ERROR` machine code.
//!
//! ## Custom Validators
//!
//! | Validator | Purpose |
//! |-----------|---------|
//! | `not_blank` | String has content after trimming |
//! | `valid_code_challenge` | PKCE challenge: 43-256 base64url chars |
//! | `valid_scope_list` | Space-separated scope tokens |

use crate::errors::ApiError;
use validator::Validate;

/// Validates a request DTO that implements `Validate`.
///
/// # Errors
///
/// Returns `ApiError::ValidationError` with field-level details on failure.
pub fn validate_request<T: Validate>(data: &T) -> Result<(), ApiError> {
    data.validate().map_err(ApiError::ValidationError)
}

/// Custom validation functions for use with `#[validate(custom)]`.
pub mod validators {
    use validator::ValidationError;

    /// Validates that a string is not blank (empty or whitespace-only).
    pub fn not_blank(value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new("blank"));
        }
        Ok(())
    }

    /// Validates a PKCE code challenge per RFC 7636 §4.2.
    ///
    /// Length must be 43-256 characters and the alphabet is base64url plus
    /// the unreserved characters (`A-Z a-z 0-9 - . _ ~`). 42 and 257 are
    /// out; 43 and 256 are in.
    pub fn valid_code_challenge(value: &str) -> Result<(), ValidationError> {
        if value.len() < 43 || value.len() > 256 {
            return Err(ValidationError::new("code_challenge_length"));
        }

        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        {
            return Err(ValidationError::new("code_challenge_charset"));
        }

        Ok(())
    }

    /// Validates that a value parses as an absolute URL.
    ///
    /// Custom schemes are allowed - native apps register loopback and
    /// app-scheme redirect URIs; the exact-match allow-list is the real
    /// gate.
    pub fn valid_absolute_url(value: &str) -> Result<(), ValidationError> {
        url::Url::parse(value).map_err(|_| ValidationError::new("invalid_url"))?;
        Ok(())
    }

    /// Validates a space-separated scope list per RFC 6749 §3.3.
    ///
    /// Each token must be non-empty printable ASCII without spaces,
    /// backslashes or double quotes.
    pub fn valid_scope_list(value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new("empty_scope"));
        }

        for token in value.split(' ') {
            if token.is_empty() {
                return Err(ValidationError::new("empty_scope_token"));
            }
            if !token
                .chars()
                .all(|c| ('\u{21}'..='\u{7e}').contains(&c) && c != '"' && c != '\\')
            {
                return Err(ValidationError::new("invalid_scope_charset"));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::validators::*;

    #[test]
    fn test_not_blank() {
        assert!(not_blank("hello").is_ok());
        assert!(not_blank("  hello  ").is_ok());
        assert!(not_blank("").is_err());
        assert!(not_blank("   ").is_err());
    }

    #[test]
    fn test_code_challenge_length_bounds() {
        // 43 and 256 pass; 42 and 257 fail
        assert!(valid_code_challenge(&"a".repeat(43)).is_ok());
        assert!(valid_code_challenge(&"a".repeat(256)).is_ok());
        assert!(valid_code_challenge(&"a".repeat(42)).is_err());
        assert!(valid_code_challenge(&"a".repeat(257)).is_err());
    }

    #[test]
    fn test_code_challenge_charset() {
        assert!(valid_code_challenge("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM").is_ok());
        // '+' and '/' belong to standard base64, not base64url
        assert!(valid_code_challenge(&format!("{}+", "a".repeat(43))).is_err());
        assert!(valid_code_challenge(&format!("{}/", "a".repeat(43))).is_err());
    }

    #[test]
    fn test_absolute_url() {
        assert!(valid_absolute_url("http://localhost:8888/callback").is_ok());
        assert!(valid_absolute_url("https://app.example.com/cb").is_ok());
        // Native-app scheme is fine; the allow-list does the real gating
        assert!(valid_absolute_url("myapp://oauth/callback").is_ok());
        assert!(valid_absolute_url("not a url").is_err());
        assert!(valid_absolute_url("/relative/path").is_err());
    }

    #[test]
    fn test_scope_list() {
        assert!(valid_scope_list("memories:read memories:write profile").is_ok());
        assert!(valid_scope_list("mcp:full").is_ok());
        assert!(valid_scope_list("").is_err());
        assert!(valid_scope_list("a  b").is_err()); // double space
        assert!(valid_scope_list("bad\"scope").is_err());
    }
}
