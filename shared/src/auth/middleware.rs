//! # Caller Resolution (Bearer JWT + API Key)
//!
//! The single identity dependency every protected endpoint has: *given an
//! incoming request, populate the caller or reject*.
//!
//! ## Resolution Order
//!
//! ```text
//! ┌─────────┐    ┌───────────────────────┐    ┌──────────────────────┐
//! │ Request │───►│ Authorization: Bearer?│───►│ JWT valid? → caller  │
//! └─────────┘    └──────────┬────────────┘    └──────────┬───────────┘
//!                           │ absent/invalid             │ ok
//!                           ▼                            ▼
//!                ┌───────────────────────┐        scopes = ["*"]
//!                │ X-API-Key /           │        (first-party session)
//!                │ Authorization: ApiKey │
//!                └──────────┬────────────┘
//!                           │ found
//!                           ▼
//!                ┌───────────────────────┐
//!                │ store lookup → caller │  scopes = key's scopes
//!                └──────────┬────────────┘
//!                           │ key unknown/inactive, or neither presented
//!                           ▼
//!                  401 AUTH_TOKEN_MISSING
//! ```
//!
//! Accepting either credential type on every endpoint is deliberate:
//! historically different subsystems accepted only one, which broke clients
//! that had migrated to OAuth but still hit legacy endpoints.
//!
//! A JWT that fails verification does not abort resolution - the API-key
//! path still runs. When both paths fail the request gets one uniform
//! rejection, 401 `AUTH_TOKEN_MISSING`: a missing header, a dead JWT and
//! an unknown key are indistinguishable on the wire.
//!
//! ## API-Key Users Without a Registry Row
//!
//! Machine callers may authenticate with a key whose user never logged in
//! through the browser, so no email exists in the local registry. That is
//! tolerated: the caller gets the synthetic email `{user_id}@api-key.local`.

use crate::auth::jwt::JwtService;
use crate::errors::ApiError;
use actix_web::HttpRequest;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

// =============================================================================
// Authenticated Caller
// =============================================================================

/// Which credential type authenticated the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialType {
    /// First-party session JWT from the `Authorization: Bearer` header.
    SessionJwt,
    /// API key from `X-API-Key` or `Authorization: ApiKey`.
    ApiKey,
}

/// The resolved caller, available to every protected handler.
#[derive(Debug, Clone)]
pub struct AuthenticatedCaller {
    /// The user's unique identifier
    pub user_id: Uuid,
    /// Email (synthetic `{user_id}@api-key.local` for registry-less keys)
    pub email: String,
    /// Role string (`user`, `admin`, ...)
    pub role: String,
    /// Granted scopes; `["*"]` means unrestricted first-party access
    pub scopes: Vec<String>,
    /// How the caller authenticated
    pub credential_type: CredentialType,
}

impl AuthenticatedCaller {
    /// Checks whether the caller holds a scope.
    ///
    /// The `*` wildcard (first-party sessions) grants everything.
    pub fn has_scope(&self, required: &str) -> bool {
        self.scopes.iter().any(|s| s == "*" || s == required)
    }

    /// Errors with 403 `INSUFFICIENT_SCOPE` when a scope is missing.
    ///
    /// Distinct from 401: the caller *is* authenticated.
    pub fn require_scope(&self, required: &str) -> Result<(), ApiError> {
        if self.has_scope(required) {
            Ok(())
        } else {
            Err(ApiError::InsufficientScope {
                required: required.to_string(),
            })
        }
    }

    /// Errors with 403 unless the caller is an admin.
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role == "admin" {
            Ok(())
        } else {
            Err(ApiError::AccessDenied)
        }
    }
}

// =============================================================================
// API-Key Verifier Contract
// =============================================================================

/// Result of a successful API-key validation.
#[derive(Debug, Clone)]
pub struct VerifiedApiKey {
    /// Owner of the key
    pub user_id: Uuid,
    /// Scopes granted to the key
    pub scopes: Vec<String>,
    /// Email from the local registry, if the user has a row
    pub email: Option<String>,
    /// Role from the local registry; defaults to `user`
    pub role: Option<String>,
}

/// Store-backed API-key validation, implemented by the gateway's key
/// service. Kept behind a trait so the resolver (and its tests) don't
/// depend on the repository layer.
#[async_trait]
pub trait ApiKeyVerifier: Send + Sync {
    /// Validates a raw key. `Ok(None)` means unknown/inactive/expired.
    async fn verify(&self, raw_key: &str) -> Result<Option<VerifiedApiKey>, ApiError>;
}

// =============================================================================
// Caller Resolver
// =============================================================================

/// Resolves the caller for protected endpoints.
///
/// Shared via `web::Data`; handlers call [`CallerResolver::resolve`] at the
/// top of the protected path.
#[derive(Clone)]
pub struct CallerResolver {
    jwt_service: Arc<JwtService>,
    key_verifier: Arc<dyn ApiKeyVerifier>,
}

impl CallerResolver {
    pub fn new(jwt_service: Arc<JwtService>, key_verifier: Arc<dyn ApiKeyVerifier>) -> Self {
        Self {
            jwt_service,
            key_verifier,
        }
    }

    /// Resolves the caller or rejects with 401 `AUTH_TOKEN_MISSING`.
    pub async fn resolve(&self, req: &HttpRequest) -> Result<AuthenticatedCaller, ApiError> {
        // Path 1: Bearer JWT. Failure here is not terminal - fall through
        // to the API-key path.
        if let Some(token) = bearer_token(req) {
            if let Ok(claims) = self.jwt_service.validate_session_token(token) {
                return Ok(AuthenticatedCaller {
                    user_id: claims.sub,
                    email: claims.email,
                    role: claims.role,
                    // First-party sessions are unrestricted
                    scopes: vec!["*".to_string()],
                    credential_type: CredentialType::SessionJwt,
                });
            }
        }

        // Path 2: API key. An unknown or inactive key is not a distinct
        // outcome - it falls through to the single terminal failure, so
        // the wire contract doesn't reveal whether a presented key exists.
        if let Some(raw_key) = api_key_from_request(req) {
            if let Some(verified) = self.key_verifier.verify(raw_key).await? {
                let email = verified
                    .email
                    .unwrap_or_else(|| format!("{}@api-key.local", verified.user_id));
                return Ok(AuthenticatedCaller {
                    user_id: verified.user_id,
                    email,
                    role: verified.role.unwrap_or_else(|| "user".to_string()),
                    scopes: verified.scopes,
                    credential_type: CredentialType::ApiKey,
                });
            }
        }

        // Both paths failed (or neither credential was presented)
        Err(ApiError::MissingAuth)
    }
}

/// Extracts a bearer token from the `Authorization` header, if present.
fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

/// Extracts an API key from `X-API-Key` or `Authorization: ApiKey ...`.
fn api_key_from_request(req: &HttpRequest) -> Option<&str> {
    if let Some(key) = req
        .headers()
        .get("X-API-Key")
        .and_then(|h| h.to_str().ok())
        .filter(|k| !k.is_empty())
    {
        return Some(key);
    }

    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("ApiKey "))
        .filter(|k| !k.is_empty())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    struct StaticVerifier {
        known_key: String,
        result: VerifiedApiKey,
    }

    #[async_trait]
    impl ApiKeyVerifier for StaticVerifier {
        async fn verify(&self, raw_key: &str) -> Result<Option<VerifiedApiKey>, ApiError> {
            if raw_key == self.known_key {
                Ok(Some(self.result.clone()))
            } else {
                Ok(None)
            }
        }
    }

    fn resolver_with(verifier: StaticVerifier) -> CallerResolver {
        let jwt = Arc::new(JwtService::new(
            "test_secret_key_minimum_32_chars_required",
            604800,
        ));
        CallerResolver::new(jwt, Arc::new(verifier))
    }

    fn default_verifier() -> StaticVerifier {
        StaticVerifier {
            known_key: "lano_live_goodkey".into(),
            result: VerifiedApiKey {
                user_id: Uuid::new_v4(),
                scopes: vec!["memories:read".into()],
                email: None,
                role: None,
            },
        }
    }

    #[actix_web::test]
    async fn test_valid_bearer_jwt_wins() {
        let resolver = resolver_with(default_verifier());
        let user_id = Uuid::new_v4();
        let token = resolver
            .jwt_service
            .generate_session_token(user_id, "user@example.com", "user", "web")
            .unwrap();

        let req = TestRequest::default()
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_http_request();

        let caller = resolver.resolve(&req).await.unwrap();
        assert_eq!(caller.user_id, user_id);
        assert_eq!(caller.credential_type, CredentialType::SessionJwt);
        assert!(caller.has_scope("anything-at-all")); // wildcard
    }

    #[actix_web::test]
    async fn test_bad_jwt_falls_through_to_api_key() {
        let verifier = default_verifier();
        let expected_user = verifier.result.user_id;
        let resolver = resolver_with(verifier);

        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer not.a.jwt"))
            .insert_header(("X-API-Key", "lano_live_goodkey"))
            .to_http_request();

        let caller = resolver.resolve(&req).await.unwrap();
        assert_eq!(caller.user_id, expected_user);
        assert_eq!(caller.credential_type, CredentialType::ApiKey);
        // Synthetic email for registry-less key users
        assert_eq!(caller.email, format!("{}@api-key.local", expected_user));
        assert!(caller.has_scope("memories:read"));
        assert!(!caller.has_scope("memories:write"));
    }

    #[actix_web::test]
    async fn test_api_key_via_authorization_scheme() {
        let resolver = resolver_with(default_verifier());

        let req = TestRequest::default()
            .insert_header(("Authorization", "ApiKey lano_live_goodkey"))
            .to_http_request();

        let caller = resolver.resolve(&req).await.unwrap();
        assert_eq!(caller.credential_type, CredentialType::ApiKey);
    }

    #[actix_web::test]
    async fn test_unknown_key_is_missing_auth() {
        let resolver = resolver_with(default_verifier());

        let req = TestRequest::default()
            .insert_header(("X-API-Key", "lano_live_wrong"))
            .to_http_request();

        // Unknown key and absent key share the one terminal rejection
        assert!(matches!(
            resolver.resolve(&req).await,
            Err(ApiError::MissingAuth)
        ));
    }

    #[actix_web::test]
    async fn test_no_credentials_is_missing_auth() {
        let resolver = resolver_with(default_verifier());
        let req = TestRequest::default().to_http_request();

        assert!(matches!(
            resolver.resolve(&req).await,
            Err(ApiError::MissingAuth)
        ));
    }

    #[test]
    fn test_scope_checks() {
        let caller = AuthenticatedCaller {
            user_id: Uuid::new_v4(),
            email: "user@example.com".into(),
            role: "user".into(),
            scopes: vec!["memories:read".into()],
            credential_type: CredentialType::ApiKey,
        };

        assert!(caller.require_scope("memories:read").is_ok());
        assert!(matches!(
            caller.require_scope("memories:delete"),
            Err(ApiError::InsufficientScope { .. })
        ));
        assert!(matches!(caller.require_admin(), Err(ApiError::AccessDenied)));
    }
}
