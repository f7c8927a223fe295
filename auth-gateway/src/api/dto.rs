//! # Data Transfer Objects (DTOs)
//!
//! The API contract: request validation and response shapes.
//!
//! ## Two Naming Regimes
//!
//! | Surface | Casing | Why |
//! |---------|--------|-----|
//! | `/oauth/*` | `snake_case` | RFC 6749/8628/7662 wire grammar |
//! | management APIs (`/api/v1/keys`, `/admin`, ...) | `camelCase` | house convention for JS frontends |
//!
//! The OAuth field names are not ours to restyle; the management DTOs
//! follow the same convention as every other service in the fleet.
//!
//! ## Validation Rules
//!
//! | Field | Rules |
//! |-------|-------|
//! | `client_id` | 1-255 chars |
//! | `redirect_uri` | must parse as a URL |
//! | `code_challenge` | 43-256 chars, base64url alphabet |
//! | `scope` | space-separated printable tokens |
//! | `email` | valid email format |
//! | `password` | 8-128 chars (login), 10-128 (admin change) |

use serde::{Deserialize, Serialize};
use shared::validation::validators;
use uuid::Uuid;
use validator::Validate;

use crate::domain::entities::{ApiKey, Project, StoredApiKey, TokenPair};

// =============================================================================
// OAUTH - REQUESTS (snake_case wire grammar)
// =============================================================================

/// Query parameters of `GET /oauth/authorize`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AuthorizeQuery {
    #[validate(length(min = 1, max = 255, message = "client_id must be 1-255 characters"))]
    pub client_id: String,

    #[validate(length(min = 1, message = "response_type is required"))]
    pub response_type: String,

    #[validate(custom(function = "validators::valid_absolute_url"))]
    pub redirect_uri: String,

    #[validate(custom(function = "validators::valid_scope_list"))]
    pub scope: Option<String>,

    pub state: Option<String>,

    #[validate(custom(function = "validators::valid_code_challenge"))]
    pub code_challenge: Option<String>,

    pub code_challenge_method: Option<String>,
}

/// Form body of `POST /oauth/token` (all grant types).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TokenRequestForm {
    #[validate(length(min = 1, message = "grant_type is required"))]
    pub grant_type: String,

    #[validate(length(min = 1, max = 255, message = "client_id must be 1-255 characters"))]
    pub client_id: String,

    pub client_secret: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub device_code: Option<String>,
    pub scope: Option<String>,
}

/// Form body of `POST /oauth/revoke` (RFC 7009).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RevokeForm {
    #[validate(length(min = 1, message = "token is required"))]
    pub token: String,

    pub token_type_hint: Option<String>,
}

/// Form body of `POST /oauth/introspect` (RFC 7662).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IntrospectForm {
    #[validate(length(min = 1, message = "token is required"))]
    pub token: String,
}

/// Body of `POST /oauth/device` (RFC 8628 §3.1).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DeviceAuthorizationForm {
    #[validate(length(min = 1, max = 255, message = "client_id must be 1-255 characters"))]
    pub client_id: String,

    #[validate(custom(function = "validators::valid_scope_list"))]
    pub scope: Option<String>,
}

// =============================================================================
// OAUTH - RESPONSES
// =============================================================================

/// Successful token response (RFC 6749 §5.1).
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponseDto {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
}

impl From<TokenPair> for TokenResponseDto {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: pair.expires_in,
            scope: pair.scope.join(" "),
        }
    }
}

// =============================================================================
// WEB LOGIN BRIDGE
// =============================================================================

/// Query of `GET /web/login` and `GET /web/logout`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReturnToQuery {
    pub return_to: Option<String>,
}

/// Form body of `POST /web/login`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WebLoginForm {
    #[validate(email(message = "Invalid email format"))]
    #[validate(length(max = 255, message = "Email too long"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    pub return_to: Option<String>,
}

/// Query of `GET /web/device` (user-code prefill).
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceVerifyQuery {
    pub user_code: Option<String>,
}

/// Form body of `POST /web/device` - the user's decision.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DeviceDecisionForm {
    #[validate(length(min = 1, max = 16, message = "user_code is required"))]
    pub user_code: String,

    /// `approve` or `deny`
    #[validate(length(min = 1, message = "action is required"))]
    pub action: String,
}

// =============================================================================
// API KEYS (camelCase management surface)
// =============================================================================

/// Body of `POST /api/v1/keys`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[serde(default)]
    pub scopes: Vec<String>,

    /// Days until expiry; absent = non-expiring
    pub expires_in_days: Option<i64>,

    pub organization_id: Option<Uuid>,
}

/// Body of `POST /api/v1/keys/{id}/rotate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateApiKeyRequest {
    /// Seconds the old key keeps validating; absent = immediate cutoff
    pub grace_seconds: Option<i64>,
}

/// Key metadata, safe for listings (no secret material exists to leak).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyDto {
    pub id: Uuid,
    pub name: String,
    pub prefix: String,
    pub scopes: Vec<String>,
    pub is_active: bool,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<ApiKey> for ApiKeyDto {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            prefix: key.prefix,
            scopes: key.scopes,
            is_active: key.is_active,
            expires_at: key.expires_at,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
        }
    }
}

/// Creation/rotation response: the one and only appearance of the raw key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedApiKeyDto {
    /// Full key value - shown once, never retrievable again
    pub key: String,
    #[serde(flatten)]
    pub meta: ApiKeyDto,
}

// =============================================================================
// PROJECTS & STORED KEYS
// =============================================================================

/// Body of `POST /api/v1/projects`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub organization_id: Uuid,

    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(max = 500, message = "Description too long"))]
    pub description: Option<String>,
}

/// Body of `POST /api/v1/projects/{id}/keys`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StoreKeyRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    /// e.g. `production`, `staging`; defaults to `production`
    #[serde(default = "default_environment")]
    #[validate(custom(function = "validators::not_blank"))]
    pub environment: String,

    #[validate(length(min = 1, max = 4096, message = "Value must be 1-4096 characters"))]
    pub value: String,
}

fn default_environment() -> String {
    "production".to_string()
}

/// Stored-key metadata (value omitted).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKeyDto {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub environment: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<StoredApiKey> for StoredKeyDto {
    fn from(key: StoredApiKey) -> Self {
        Self {
            id: key.id,
            project_id: key.project_id,
            name: key.name,
            environment: key.environment,
            created_at: key.created_at,
            updated_at: key.updated_at,
        }
    }
}

/// Reveal response: metadata plus the decrypted value.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealedKeyDto {
    #[serde(flatten)]
    pub meta: StoredKeyDto,
    pub value: String,
}

/// Project listing entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDto {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Project> for ProjectDto {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            organization_id: project.organization_id,
            name: project.name,
            description: project.description,
            created_at: project.created_at,
        }
    }
}

// =============================================================================
// ADMIN
// =============================================================================

/// Body of `POST /admin/bypass-login`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdminLoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Body of `POST /admin/change-password`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 10, max = 128, message = "Password must be 10-128 characters"))]
    pub new_password: String,
}

/// Body of `POST /admin/register-app`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAppRequest {
    #[validate(length(min = 1, max = 255, message = "client_id must be 1-255 characters"))]
    pub client_id: String,

    /// `public` or `confidential`
    #[validate(length(min = 1, message = "client_type is required"))]
    pub client_type: String,

    /// `web`, `native`, `cli`, `mcp` or `server`
    #[validate(length(min = 1, message = "application_type is required"))]
    pub application_type: String,

    #[serde(default = "default_require_pkce")]
    pub require_pkce: bool,

    #[serde(default = "default_challenge_methods")]
    pub allowed_code_challenge_methods: Vec<String>,

    #[serde(default)]
    pub allowed_redirect_uris: Vec<String>,

    #[serde(default)]
    pub allowed_scopes: Vec<String>,

    #[serde(default)]
    pub default_scopes: Vec<String>,
}

fn default_require_pkce() -> bool {
    true
}

fn default_challenge_methods() -> Vec<String> {
    vec!["S256".to_string()]
}

/// Bypass-login response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminLoginResponse {
    pub token: String,
    pub admin_id: Uuid,
    pub email: String,
}

/// Registration response; `clientSecret` appears exactly once.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredAppResponse {
    pub client_id: String,
    pub client_type: String,
    pub application_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

// =============================================================================
// HEALTH & GENERIC
// =============================================================================

/// `GET /health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: String,
    pub service: String,
    pub timestamp: String,
    pub database: String,
    pub redis: String,
    pub outbox: OutboxHealth,
}

/// Outbox depth section of the health response.
#[derive(Debug, Clone, Serialize)]
pub struct OutboxHealth {
    pub pending: i64,
    /// Dead-lettered deliveries; non-zero means operator attention
    pub failed: i64,
}

/// Generic message response.
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_token_response_wire_shape() {
        let pair = TokenPair {
            access_token: "access-raw".into(),
            refresh_token: "refresh-raw".into(),
            access_token_id: Uuid::new_v4(),
            refresh_token_id: Uuid::new_v4(),
            scope: vec!["memories:read".into(), "profile".into()],
            expires_in: 900,
        };

        let json = serde_json::to_value(TokenResponseDto::from(pair)).unwrap();
        // RFC 6749 field names, snake_case
        assert_eq!(json["token_type"], "Bearer");
        assert_eq!(json["expires_in"], 900);
        assert_eq!(json["scope"], "memories:read profile");
        assert!(json.get("accessToken").is_none());
    }

    #[test]
    fn test_authorize_query_validation() {
        let valid = AuthorizeQuery {
            client_id: "cli".into(),
            response_type: "code".into(),
            redirect_uri: "http://localhost:8888/callback".into(),
            scope: Some("api:access".into()),
            state: Some("xyz".into()),
            code_challenge: Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".into()),
            code_challenge_method: Some("S256".into()),
        };
        assert!(valid.validate().is_ok());

        let mut bad_challenge = valid.clone();
        bad_challenge.code_challenge = Some("too-short".into());
        assert!(bad_challenge.validate().is_err());

        let mut bad_uri = valid;
        bad_uri.redirect_uri = "not a url".into();
        assert!(bad_uri.validate().is_err());
    }

    #[test]
    fn test_created_key_dto_flattens_meta() {
        let dto = CreatedApiKeyDto {
            key: "lano_live_rawvalue".into(),
            meta: ApiKeyDto {
                id: Uuid::new_v4(),
                name: "ci".into(),
                prefix: "lano_live_".into(),
                scopes: vec![],
                is_active: true,
                expires_at: None,
                last_used_at: None,
                created_at: Utc::now(),
            },
        };
        let json = serde_json::to_value(dto).unwrap();
        assert!(json["key"].as_str().unwrap().starts_with("lano_live_"));
        assert_eq!(json["name"], "ci"); // flattened
        assert_eq!(json["isActive"], true); // camelCase
    }

    #[test]
    fn test_register_app_defaults() {
        let request: RegisterAppRequest = serde_json::from_value(serde_json::json!({
            "clientId": "new-cli",
            "clientType": "public",
            "applicationType": "cli"
        }))
        .unwrap();
        assert!(request.require_pkce);
        assert_eq!(request.allowed_code_challenge_methods, vec!["S256"]);
        assert!(request.allowed_redirect_uris.is_empty());
    }
}
