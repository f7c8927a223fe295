//! # Application Error Types
//!
//! Unified error handling for the gateway with automatic HTTP conversion.
//!
//! ## Design Philosophy
//!
//! This module follows the "make illegal states unrepresentable" principle.
//! Each error variant maps to a specific HTTP status code and a stable
//! machine code, ensuring consistent API responses across the service.
//!
//! Two families live here:
//!
//! - [`ApiError`] - the general error surface for JSON endpoints (sessions,
//!   API keys, admin, health). Serialized as `{code, message, details?}`.
//! - [`OAuthError`] - protocol errors for the OAuth endpoints, serialized in
//!   RFC 6749 shape as `{error, error_description}`. Controllers decide
//!   whether to answer with a JSON body or a redirect carrying `error`,
//!   `error_description` and `state` - that choice depends on whether the
//!   `client_id` and `redirect_uri` were validated first, which only the
//!   authorize handler knows.
//!
//! ## Error Categories (ApiError)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ApiError Categories                            │
//! ├─────────────────────────┬───────────────────┬───────────────────────────┤
//! │ Authentication (401)    │ Authorization(403)│ Validation (400)          │
//! ├─────────────────────────┼───────────────────┼───────────────────────────┤
//! │ InvalidCredentials      │ InsufficientScope │ ValidationError           │
//! │ TokenExpired            │ AccessDenied      │ BadRequest                │
//! │ InvalidToken            │                   │ InvalidUuid               │
//! │ MissingAuth             │                   │                           │
//! │ AccountLocked           │                   │                           │
//! ├─────────────────────────┴───────────────────┴───────────────────────────┤
//! │ Resources (404, 409)    │ Rate Limit (429)  │ Server (500, 503)         │
//! ├─────────────────────────┼───────────────────┼───────────────────────────┤
//! │ NotFound                │ TooManyRequests   │ DatabaseError             │
//! │ Conflict                │                   │ RedisError                │
//! │                         │                   │ InternalError             │
//! │                         │                   │ ServiceUnavailable        │
//! └─────────────────────────┴───────────────────┴───────────────────────────┘
//! ```
//!
//! ## HTTP Response Format (ApiError)
//!
//! ```json
//! {
//!   "code": "AUTH_TOKEN_MISSING",
//!   "message": "Missing authentication",
//!   "details": { ... },
//!   "timestamp": "2024-01-15T10:30:00Z"
//! }
//! ```
//!
//! 401 means the caller presented no valid credential; 403 means the caller
//! is authenticated but lacks the required scope. The two are distinct and
//! must stay distinct - clients branch on them.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::ValidationErrors;

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for handlers and services.
pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Main Error Enum
// =============================================================================

/// Application error type with automatic HTTP status mapping.
///
/// Each variant represents a specific error condition and maps to an
/// appropriate HTTP status code. The `#[error]` attribute defines the
/// error message format.
#[derive(Debug, Error)]
pub enum ApiError {
    // =========================================================================
    // Authentication Errors (401 Unauthorized)
    // =========================================================================
    // The caller is not authenticated or their credential is invalid.

    /// Wrong email/password combination, or an unknown API key.
    /// Returns 401 Unauthorized.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Credential has expired (session JWT past `exp`, API key past
    /// `expires_at`). Returns 401 Unauthorized.
    #[error("Token expired")]
    TokenExpired,

    /// Credential is malformed, has an invalid signature, or has been
    /// revoked. Returns 401 Unauthorized.
    #[error("Invalid token")]
    InvalidToken,

    /// Request carries neither a usable `Authorization: Bearer` header nor
    /// an `X-API-Key`. Returns 401 Unauthorized with code
    /// `AUTH_TOKEN_MISSING`.
    #[error("Missing authentication")]
    MissingAuth,

    /// Identifier temporarily locked after repeated failed login attempts.
    /// Returns 401 Unauthorized with `locked_until` in details.
    #[error("Account locked")]
    AccountLocked {
        /// When the identifier unlocks
        until: chrono::DateTime<chrono::Utc>,
    },

    // =========================================================================
    // Authorization Errors (403 Forbidden)
    // =========================================================================
    // Caller is authenticated but lacks permission. Re-authenticating with
    // the same credential won't help.

    /// Credential lacks a required scope.
    /// Returns 403 Forbidden.
    #[error("Insufficient scope: {required}")]
    InsufficientScope {
        /// The scope the endpoint required
        required: String,
    },

    /// Caller can't touch this specific resource (ownership or membership
    /// check failed). Returns 403 Forbidden.
    #[error("Resource access denied")]
    AccessDenied,

    // =========================================================================
    // Validation Errors (400 Bad Request)
    // =========================================================================

    /// Request body failed validation rules.
    /// Contains field-level errors from the `validator` crate.
    #[error("Validation error")]
    ValidationError(#[from] ValidationErrors),

    /// Generic bad request with custom message. Machine code
    /// `INVALID_REQUEST`.
    #[error("Invalid input: {message}")]
    BadRequest {
        /// Human-readable description of what's wrong
        message: String,
    },

    /// UUID parsing failed.
    #[error("Invalid UUID format")]
    InvalidUuid,

    // =========================================================================
    // Resource Errors (404 Not Found, 409 Conflict)
    // =========================================================================

    /// Requested resource doesn't exist. Also used for unknown routes.
    #[error("Resource not found: {resource}")]
    NotFound {
        /// Resource identifier (e.g. "api_key:123", "route:/nope")
        resource: String,
    },

    /// Action would violate a uniqueness constraint.
    /// Example: registering a project name already used in the organization.
    #[error("Resource already exists: {resource}")]
    Conflict {
        /// Description of the conflict
        resource: String,
    },

    // =========================================================================
    // Rate Limiting (429 Too Many Requests)
    // =========================================================================

    /// Client exceeded an endpoint quota. The response carries a
    /// `Retry-After` header.
    #[error("Too many requests")]
    TooManyRequests {
        /// Seconds until the client can retry
        retry_after_seconds: u64,
    },

    // =========================================================================
    // Server Errors (500 Internal Server Error, 503 Service Unavailable)
    // =========================================================================
    // Logged as errors and monitored. Details are NOT exposed to clients.

    /// PostgreSQL query failed. Details logged, generic message returned.
    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    /// Redis operation failed. Details logged, generic message returned.
    #[error("Redis error")]
    RedisError(#[from] redis::RedisError),

    /// Unspecified internal error. Last resort.
    #[error("Internal server error")]
    InternalError {
        /// Internal message for logging (not exposed to client)
        message: String,
    },

    /// External collaborator (identity provider, read-side store) is down.
    #[error("Service unavailable")]
    ServiceUnavailable {
        /// Name of the unavailable service
        service: String,
    },
}

// =============================================================================
// Error Methods
// =============================================================================

impl ApiError {
    /// Returns a machine-readable error code.
    ///
    /// These codes are stable and can be used by API clients for
    /// programmatic error handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            // Authentication
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::MissingAuth => "AUTH_TOKEN_MISSING",
            Self::AccountLocked { .. } => "ACCOUNT_LOCKED",
            // Authorization
            Self::InsufficientScope { .. } => "INSUFFICIENT_SCOPE",
            Self::AccessDenied => "ACCESS_DENIED",
            // Validation
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::BadRequest { .. } => "INVALID_REQUEST",
            Self::InvalidUuid => "INVALID_UUID",
            // Resources
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            // Rate limiting
            Self::TooManyRequests { .. } => "TOO_MANY_REQUESTS",
            // Server
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::RedisError(_) => "REDIS_ERROR",
            Self::InternalError { .. } => "INTERNAL_ERROR",
            Self::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
        }
    }

    /// Returns the HTTP status code for this error.
    ///
    /// This is the source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 401 Unauthorized - Authentication required or failed
            Self::InvalidCredentials
            | Self::TokenExpired
            | Self::InvalidToken
            | Self::MissingAuth
            | Self::AccountLocked { .. } => StatusCode::UNAUTHORIZED,

            // 403 Forbidden - Authenticated but not authorized
            Self::InsufficientScope { .. } | Self::AccessDenied => StatusCode::FORBIDDEN,

            // 400 Bad Request - Client sent invalid data
            Self::ValidationError(_) | Self::BadRequest { .. } | Self::InvalidUuid => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            Self::NotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            Self::Conflict { .. } => StatusCode::CONFLICT,

            // 429 Too Many Requests
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            Self::DatabaseError(_) | Self::RedisError(_) | Self::InternalError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            // 503 Service Unavailable
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns `true` if this is a server-side error (5xx).
    ///
    /// Server errors are logged at ERROR level and never expose internal
    /// detail to clients. Client errors (4xx) are logged at WARN level.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_)
                | Self::RedisError(_)
                | Self::InternalError { .. }
                | Self::ServiceUnavailable { .. }
        )
    }

    /// Returns `true` for transient database failures that an idempotent
    /// read may retry once (connection reset, pool timeout). Writes never
    /// auto-retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(sqlx::Error::Io(_))
                | Self::DatabaseError(sqlx::Error::PoolTimedOut)
                | Self::DatabaseError(sqlx::Error::PoolClosed)
        )
    }
}

// =============================================================================
// Response Structure
// =============================================================================

/// Standard error response body for the API.
///
/// All non-OAuth errors are serialized to this format for consistency.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code for programmatic handling
    pub code: String,

    /// Human-readable message (for debugging, not for user display)
    pub message: String,

    /// Additional error details (varies by error type).
    /// - ValidationError: field-level errors
    /// - TooManyRequests: `retry_after_seconds`
    /// - AccountLocked: `locked_until`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// When the error occurred (ISO 8601 format)
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorResponse {
    /// Creates a new error response from an `ApiError`.
    pub fn new(error: &ApiError) -> Self {
        // Extract type-specific details
        let details = match error {
            ApiError::ValidationError(errors) => {
                Some(serde_json::to_value(errors).unwrap_or_default())
            }
            ApiError::TooManyRequests {
                retry_after_seconds,
            } => Some(serde_json::json!({ "retry_after_seconds": retry_after_seconds })),
            ApiError::AccountLocked { until } => {
                Some(serde_json::json!({ "locked_until": until }))
            }
            ApiError::InsufficientScope { required } => {
                Some(serde_json::json!({ "required_scope": required }))
            }
            // Server errors: don't expose internal details
            _ => None,
        };

        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
            details,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Implements Actix-web's `ResponseError` trait so handlers can return
/// `Result<HttpResponse, ApiError>` directly.
impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        // Delegate to our implementation
        self.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        let response = ErrorResponse::new(self);
        let mut builder = HttpResponse::build(self.status_code());

        // Rate-limited responses carry the standard header alongside the body
        if let ApiError::TooManyRequests {
            retry_after_seconds,
        } = self
        {
            builder.insert_header(("Retry-After", retry_after_seconds.to_string()));
        }

        builder.json(response)
    }
}

// =============================================================================
// OAuth Protocol Errors (RFC 6749)
// =============================================================================

/// OAuth 2.0 error codes as defined by RFC 6749 §5.2 and RFC 8628 §3.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthErrorKind {
    /// Missing or malformed parameter, duplicate parameter, etc.
    InvalidRequest,
    /// Unknown client, inactive client, or failed client authentication.
    InvalidClient,
    /// Invalid/expired/consumed code, bad verifier, revoked refresh token,
    /// redirect URI mismatch.
    InvalidGrant,
    /// The client may not use this grant type.
    UnauthorizedClient,
    /// Grant type not supported by this server.
    UnsupportedGrantType,
    /// Requested scope outside the client's allow-list.
    InvalidScope,
    /// Resource owner or server denied the request.
    AccessDenied,
    /// Unexpected server failure.
    ServerError,
    /// Server temporarily overloaded or a dependency is down.
    TemporarilyUnavailable,
    /// Device flow: user has not yet approved. Keep polling.
    AuthorizationPending,
    /// Device flow: client polled faster than the advertised interval.
    SlowDown,
    /// Device flow: device code expired before approval.
    ExpiredToken,
}

impl OAuthErrorKind {
    /// Wire representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidScope => "invalid_scope",
            Self::AccessDenied => "access_denied",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::AuthorizationPending => "authorization_pending",
            Self::SlowDown => "slow_down",
            Self::ExpiredToken => "expired_token",
        }
    }
}

/// An OAuth protocol error with a safe, client-visible description.
///
/// Build one with the named constructors:
///
/// ```rust,ignore
/// return Err(OAuthError::invalid_grant("Authorization code already used"));
/// ```
#[derive(Debug, Clone)]
pub struct OAuthError {
    /// RFC error code
    pub kind: OAuthErrorKind,
    /// Safe human-readable description (no internal detail)
    pub description: String,
}

impl std::fmt::Display for OAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.description)
    }
}

impl std::error::Error for OAuthError {}

impl OAuthError {
    pub fn new(kind: OAuthErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorKind::InvalidRequest, description)
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorKind::InvalidClient, description)
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorKind::InvalidGrant, description)
    }

    pub fn unauthorized_client(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorKind::UnauthorizedClient, description)
    }

    pub fn unsupported_grant_type(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorKind::UnsupportedGrantType, description)
    }

    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorKind::InvalidScope, description)
    }

    pub fn access_denied(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorKind::AccessDenied, description)
    }

    pub fn server_error() -> Self {
        Self::new(OAuthErrorKind::ServerError, "Internal server error")
    }

    pub fn authorization_pending() -> Self {
        Self::new(
            OAuthErrorKind::AuthorizationPending,
            "Authorization request is pending user approval",
        )
    }

    pub fn slow_down() -> Self {
        Self::new(
            OAuthErrorKind::SlowDown,
            "Polling too frequently; back off by the advertised interval",
        )
    }

    pub fn expired_token() -> Self {
        Self::new(
            OAuthErrorKind::ExpiredToken,
            "Device code expired before approval",
        )
    }

    /// HTTP status for a direct (non-redirect) response.
    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            OAuthErrorKind::InvalidClient => StatusCode::UNAUTHORIZED,
            OAuthErrorKind::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            OAuthErrorKind::TemporarilyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// RFC 6749 error body: `{"error": "...", "error_description": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    pub error_description: String,
}

impl ResponseError for OAuthError {
    fn status_code(&self) -> StatusCode {
        self.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(OAuthErrorResponse {
            error: self.kind.as_str().to_string(),
            error_description: self.description.clone(),
        })
    }
}

/// Store failures surface as `server_error` on the protocol endpoints;
/// the underlying sqlx error is logged at the call site, never echoed.
impl From<sqlx::Error> for OAuthError {
    fn from(_: sqlx::Error) -> Self {
        Self::server_error()
    }
}

impl From<ApiError> for OAuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::TooManyRequests { .. } => Self::new(
                OAuthErrorKind::TemporarilyUnavailable,
                "Rate limit exceeded",
            ),
            _ => Self::server_error(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_errors_return_401() {
        assert_eq!(
            ApiError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::TokenExpired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::InvalidToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::MissingAuth.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_authorization_errors_return_403() {
        assert_eq!(
            ApiError::InsufficientScope {
                required: "memories:write".into()
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::AccessDenied.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_machine_codes_are_stable() {
        assert_eq!(ApiError::MissingAuth.error_code(), "AUTH_TOKEN_MISSING");
        assert_eq!(
            ApiError::BadRequest {
                message: "x".into()
            }
            .error_code(),
            "INVALID_REQUEST"
        );
        assert_eq!(
            ApiError::TooManyRequests {
                retry_after_seconds: 60
            }
            .error_code(),
            "TOO_MANY_REQUESTS"
        );
    }

    #[test]
    fn test_rate_limit_response_has_retry_after() {
        let err = ApiError::TooManyRequests {
            retry_after_seconds: 42,
        };
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok()),
            Some("42")
        );
    }

    #[test]
    fn test_server_errors_are_flagged() {
        assert!(ApiError::InternalError {
            message: "test".into()
        }
        .is_server_error());
        assert!(!ApiError::InvalidCredentials.is_server_error());
    }

    #[test]
    fn test_oauth_error_wire_codes() {
        assert_eq!(OAuthErrorKind::InvalidGrant.as_str(), "invalid_grant");
        assert_eq!(
            OAuthErrorKind::AuthorizationPending.as_str(),
            "authorization_pending"
        );
        assert_eq!(OAuthErrorKind::SlowDown.as_str(), "slow_down");
    }

    #[test]
    fn test_oauth_error_status_codes() {
        assert_eq!(
            OAuthError::invalid_client("unknown").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            OAuthError::invalid_grant("bad code").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            OAuthError::server_error().status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_oauth_error_body_shape() {
        let err = OAuthError::invalid_grant("Invalid code_verifier");
        let json = serde_json::to_string(&OAuthErrorResponse {
            error: err.kind.as_str().into(),
            error_description: err.description.clone(),
        })
        .unwrap();
        assert!(json.contains("\"error\":\"invalid_grant\""));
        assert!(json.contains("Invalid code_verifier"));
    }
}
