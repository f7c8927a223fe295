//! # Session JWT Service
//!
//! Generation and validation of the signed JWT carried by the
//! `lanonasis_session` cookie.
//!
//! ## Scope of This Module
//!
//! This is the **only** first-party JWT the gateway issues. OAuth access and
//! refresh tokens are opaque random strings looked up by hash - they are
//! never JWTs, so revocation is always visible immediately.
//!
//! ## Claims
//!
//! | Claim | Description | Example |
//! |-------|-------------|---------|
//! | `sub` | User ID (UUID) | `550e8400-e29b-...` |
//! | `email` | User's email | `user@example.com` |
//! | `role` | User's role | `user` / `admin` |
//! | `platform` | Login surface | `web`, `cli`, `dashboard` |
//! | `iat` | Issued at | Unix timestamp |
//! | `exp` | Expiration | Unix timestamp |
//!
//! The payload references the **user**, not the session row id. Cookie
//! verification alone is therefore not sufficient for logout correctness:
//! the middleware re-checks the server-side session record, which is what
//! makes `POST /web/logout` take effect immediately.
//!
//! ## Security Notes
//!
//! - HS256 with a secret of at least 32 bytes (enforced at startup)
//! - Admin bypass sessions use [`JwtService::generate_session_token_with_ttl`]
//!   with a ten-year horizon; the session row's `never_expires` flag is the
//!   real policy, the JWT just has to outlive it

use crate::errors::ApiError;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Horizon used for never-expiring admin sessions.
const ADMIN_SESSION_TTL_SECONDS: u64 = 10 * 365 * 24 * 3600;

// =============================================================================
// Claims Structure
// =============================================================================

/// Session JWT claims (cookie payload).
///
/// The shape of this struct is a compatibility contract with existing
/// browser clients; do not rename fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject - the user's unique identifier (UUID).
    pub sub: Uuid,

    /// User's email address.
    pub email: String,

    /// User's role (`user`, `admin`, ...).
    pub role: String,

    /// Which surface created this session (`web`, `cli`, `dashboard`).
    pub platform: String,

    /// Issued-at as Unix timestamp.
    pub iat: i64,

    /// Expiration as Unix timestamp.
    pub exp: i64,
}

// =============================================================================
// JWT Service
// =============================================================================

/// Service for session JWT generation and validation.
///
/// Create once at startup and share via `Arc`; the underlying keys are
/// immutable after construction.
#[derive(Clone)]
pub struct JwtService {
    /// Key for signing tokens (kept secret)
    encoding_key: EncodingKey,
    /// Key for verifying signatures
    decoding_key: DecodingKey,
    /// Session lifetime in seconds
    session_ttl_seconds: u64,
}

impl JwtService {
    /// Creates a new JWT service.
    ///
    /// The secret's minimum length is enforced by config validation before
    /// this constructor runs.
    pub fn new(secret: &str, session_ttl_seconds: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            session_ttl_seconds,
        }
    }

    /// Generates a session token with the configured TTL.
    ///
    /// Called after a successful login; the returned string becomes the
    /// `lanonasis_session` cookie value.
    pub fn generate_session_token(
        &self,
        user_id: Uuid,
        email: &str,
        role: &str,
        platform: &str,
    ) -> Result<String, ApiError> {
        self.generate_session_token_with_ttl(user_id, email, role, platform, self.session_ttl_seconds)
    }

    /// Generates a session token for a never-expiring admin session.
    ///
    /// The admin bypass path must keep working while the identity provider
    /// is down, so these sessions do not roll over.
    pub fn generate_admin_session_token(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> Result<String, ApiError> {
        self.generate_session_token_with_ttl(
            user_id,
            email,
            "admin",
            "admin",
            ADMIN_SESSION_TTL_SECONDS,
        )
    }

    /// Generates a session token with an explicit TTL.
    pub fn generate_session_token_with_ttl(
        &self,
        user_id: Uuid,
        email: &str,
        role: &str,
        platform: &str,
        ttl_seconds: u64,
    ) -> Result<String, ApiError> {
        let now = Utc::now();

        let claims = SessionClaims {
            sub: user_id,
            email: email.to_string(),
            role: role.to_string(),
            platform: platform.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ttl_seconds as i64)).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            ApiError::InternalError {
                message: format!("Failed to sign session token: {}", e),
            }
        })
    }

    /// Validates and decodes a session token.
    ///
    /// # Errors
    ///
    /// - `ApiError::TokenExpired` - past `exp`
    /// - `ApiError::InvalidToken` - bad signature or malformed payload
    pub fn validate_session_token(&self, token: &str) -> Result<SessionClaims, ApiError> {
        let validation = Validation::default();

        let token_data: TokenData<SessionClaims> = decode(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => ApiError::TokenExpired,
                _ => ApiError::InvalidToken,
            })?;

        Ok(token_data.claims)
    }

    /// Session lifetime in seconds, for cookie `Max-Age`.
    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_seconds
    }

    /// Extracts the token from an `Authorization: Bearer <token>` header.
    pub fn extract_from_header(auth_header: &str) -> Result<&str, ApiError> {
        auth_header
            .strip_prefix("Bearer ")
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::InvalidToken)
    }
}

// Implement Debug manually to avoid exposing keys
impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> JwtService {
        JwtService::new("test_secret_key_minimum_32_chars_required", 604800)
    }

    #[test]
    fn test_generate_and_validate_session_token() {
        let service = test_service();
        let user_id = Uuid::new_v4();

        let token = service
            .generate_session_token(user_id, "user@example.com", "user", "web")
            .unwrap();
        let claims = service.validate_session_token(&token).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "user@example.com");
        assert_eq!(claims.role, "user");
        assert_eq!(claims.platform, "web");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let service = test_service();
        let token = service
            .generate_session_token(Uuid::new_v4(), "user@example.com", "user", "web")
            .unwrap();

        let mut tampered = token.clone();
        tampered.push('x');
        assert!(matches!(
            service.validate_session_token(&tampered),
            Err(ApiError::InvalidToken)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let service = test_service();
        let other = JwtService::new("a_completely_different_32_byte_secret!!", 604800);

        let token = service
            .generate_session_token(Uuid::new_v4(), "user@example.com", "user", "web")
            .unwrap();
        assert!(other.validate_session_token(&token).is_err());
    }

    #[test]
    fn test_admin_token_far_expiry() {
        let service = test_service();
        let token = service
            .generate_admin_session_token(Uuid::new_v4(), "root@example.com")
            .unwrap();
        let claims = service.validate_session_token(&token).unwrap();

        assert_eq!(claims.role, "admin");
        // At least nine years out
        assert!(claims.exp - claims.iat > 9 * 365 * 24 * 3600);
    }

    #[test]
    fn test_extract_from_header() {
        assert_eq!(
            JwtService::extract_from_header("Bearer abc123").unwrap(),
            "abc123"
        );
        assert!(JwtService::extract_from_header("Basic dXNlcg==").is_err());
        assert!(JwtService::extract_from_header("Bearer ").is_err());
    }
}
