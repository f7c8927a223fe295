//! # Domain Entities
//!
//! Persistent business objects mapping directly to the `auth` schema.
//!
//! ## Entity Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                            auth schema                                   │
//! │                                                                          │
//! │  ┌──────────────┐ 1:N ┌──────────────────────┐      ┌────────────────┐   │
//! │  │ OAuthClient  │────▶│ AuthorizationCode    │      │  UserAccount   │   │
//! │  └──────┬───────┘     └──────────────────────┘      └───────┬────────┘   │
//! │         │ 1:N                                               │ 1:N       │
//! │         ▼                                                   ▼           │
//! │  ┌──────────────┐      ┌──────────────────────┐     ┌────────────────┐   │
//! │  │ IssuedToken  │◀─┐   │ DeviceAuthorization  │     │    Session     │   │
//! │  │ (tree via    │──┘   └──────────────────────┘     └────────────────┘   │
//! │  │ parent_id)   │                                                       │
//! │  └──────────────┘      ┌─────────┐ 1:N ┌──────────────┐                  │
//! │                        │ Project │────▶│ StoredApiKey │                  │
//! │  ┌──────────────┐      └─────────┘     └──────────────┘                  │
//! │  │   ApiKey     │                                                       │
//! │  └──────────────┘      ┌───────────┐ 1 ┌────────────┐                   │
//! │                        │ EventRow  │──▶│ auth.outbox│                   │
//! │                        └───────────┘   └────────────┘                   │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Hashing Columns
//!
//! | Entity | `*_lookup` | `*_hash` |
//! |--------|-----------|----------|
//! | AuthorizationCode | SHA-256 (indexed) | Argon2id (verification) |
//! | IssuedToken (refresh) | SHA-256 (indexed) | Argon2id (verification) |
//! | IssuedToken (access) | SHA-256 (indexed) | SHA-256 (same digest) |
//! | DeviceAuthorization | SHA-256 (indexed) | Argon2id (verification) |
//! | ApiKey | SHA-256 (indexed, verification) | - |
//!
//! Raw values never appear in any column; the lookup digest finds the row,
//! the hash column is the verification authority.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// =============================================================================
// STATUS CONSTANTS
// =============================================================================
// Status columns are plain TEXT with CHECK constraints; these constants are
// the only spellings the Rust side uses.

/// OAuth client lifecycle states. Status changes besides registration are
/// an operator action; the gate that matters is `is_active` on every
/// protocol request.
pub mod client_status {
    pub const ACTIVE: &str = "active";
}

/// Device authorization lifecycle states.
pub mod device_status {
    pub const PENDING: &str = "pending";
    pub const APPROVED: &str = "approved";
    pub const DENIED: &str = "denied";
    pub const EXPIRED: &str = "expired";
    pub const CONSUMED: &str = "consumed";
}

/// Token revocation reasons.
pub mod revocation_reason {
    pub const ROTATED: &str = "rotated";
    pub const ANCESTOR_ROTATED: &str = "ancestor_rotated";
    pub const REVOKED: &str = "revoked";
    pub const EXPIRED: &str = "expired";
    pub const REPLAY_DETECTED: &str = "replay_detected";
}

/// Token kinds as stored in `auth.tokens.token_type`.
pub mod token_type {
    pub const ACCESS: &str = "access";
    pub const REFRESH: &str = "refresh";
}

// =============================================================================
// OAUTH CLIENT
// =============================================================================

/// A registered application.
///
/// Created by admin, mutated rarely, never destroyed (revoked instead).
/// `client_id` is stored lowercased; lookups lowercase their input, which is
/// what makes the identifier case-insensitive.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    /// Argon2id hash of the client secret (confidential clients only).
    /// Serialized into the Redis cache entry (cache hits must still be able
    /// to authenticate the client); never exposed through any API response.
    pub client_secret_hash: Option<String>,
    /// `public` or `confidential`
    pub client_type: String,
    /// `web`, `native`, `cli`, `mcp` or `server`
    pub application_type: String,
    pub require_pkce: bool,
    pub allowed_code_challenge_methods: Vec<String>,
    /// Exact-match allow-list; no normalization is applied at compare time
    pub allowed_redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub default_scopes: Vec<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthClient {
    pub fn is_active(&self) -> bool {
        self.status == client_status::ACTIVE
    }

    pub fn is_public(&self) -> bool {
        self.client_type == "public"
    }

    /// Public MCP integrations get the standard MCP scope set implicitly
    /// (auto-registration support).
    pub fn is_public_mcp(&self) -> bool {
        self.is_public() && self.application_type == "mcp"
    }
}

// =============================================================================
// AUTHORIZATION CODE
// =============================================================================

/// A one-time credential exchanged for tokens.
///
/// `consumed` transitions false→true exactly once, under a row lock taken by
/// the exchange transaction.
#[derive(Debug, Clone, FromRow)]
pub struct AuthorizationCode {
    pub id: Uuid,
    /// SHA-256 digest used to find the row
    pub code_lookup: String,
    /// Argon2id verification hash of the raw code
    pub code_hash: String,
    pub client_id: String,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub scope: Vec<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub consumed_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuthorizationCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Data required to insert an authorization code.
#[derive(Debug, Clone)]
pub struct NewAuthorizationCode {
    pub code_lookup: String,
    pub code_hash: String,
    pub client_id: String,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub scope: Vec<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

// =============================================================================
// ISSUED TOKEN
// =============================================================================

/// An access or refresh token row.
///
/// The parent-child relation is a tree: an access token's parent is the
/// refresh token whose grant produced it, and a rotated refresh token's
/// successor points back at it. Chain revocation walks the tree with a
/// recursive query - no in-memory graph exists.
#[derive(Debug, Clone, FromRow)]
pub struct IssuedToken {
    pub id: Uuid,
    pub token_lookup: String,
    pub token_hash: String,
    /// `access` or `refresh`
    pub token_type: String,
    pub client_id: String,
    pub user_id: Uuid,
    pub scope: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub parent_token_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl IssuedToken {
    pub fn is_refresh(&self) -> bool {
        self.token_type == token_type::REFRESH
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// `active` in the RFC 7662 sense: exists, not revoked, not expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

/// A freshly issued access/refresh pair with the raw values.
///
/// The raw strings exist only here and in the response body; they are never
/// persisted or logged.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_id: Uuid,
    pub refresh_token_id: Uuid,
    pub scope: Vec<String>,
    pub expires_in: i64,
}

// =============================================================================
// DEVICE AUTHORIZATION
// =============================================================================

/// Device-code flow state (RFC 8628).
///
/// Transitions: `pending` → (`approved` | `denied` | `expired`), then
/// `approved` → `consumed` when the tokens are handed out.
#[derive(Debug, Clone, FromRow)]
pub struct DeviceAuthorization {
    pub id: Uuid,
    pub device_code_lookup: String,
    pub device_code_hash: String,
    /// Human-entered short code, case-insensitive, unique while pending
    pub user_code: String,
    pub client_id: String,
    pub scope: Vec<String>,
    pub verification_uri: String,
    pub interval_seconds: i32,
    pub status: String,
    pub user_id: Option<Uuid>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DeviceAuthorization {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// =============================================================================
// API KEYS
// =============================================================================

/// First-party API key for server/machine callers.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    /// SHA-256 digest; also the verification hash (compared constant-time)
    pub key_lookup: String,
    /// Plaintext prefix for UI display (e.g. `lano_live_`)
    pub prefix: String,
    pub user_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub name: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Successor key when this one was rotated
    pub rotated_to: Option<Uuid>,
    /// A rotated key keeps validating until this instant (grace window)
    pub grace_until: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// A key validates when it is active, or rotated but still inside its
    /// grace window. Expiry always wins.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        if let Some(expires_at) = self.expires_at {
            if now >= expires_at {
                return false;
            }
        }
        if self.is_active {
            return true;
        }
        matches!(self.grace_until, Some(grace) if now < grace && self.rotated_to.is_some())
    }
}

/// Project owning stored third-party credentials.
///
/// Name unique per organization; deleting a project cascades to its keys.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Project {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A third-party credential the user entrusts to the service.
///
/// `encrypted_value` is ciphertext produced by the `Encryptor` collaborator;
/// decrypted values are returned only to authorized project members.
#[derive(Debug, Clone, FromRow)]
pub struct StoredApiKey {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub environment: String,
    pub encrypted_value: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// USER REGISTRY & SESSIONS
// =============================================================================

/// Minimal user row owned by this service (the UAI registry).
///
/// Exists so sessions, codes and audit rows have a stable FK target that
/// does not depend on the external identity provider.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserAccount {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
    pub provider: Option<String>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Server-side record of a browser session.
///
/// The cookie JWT references the user; this row is the revocation
/// authority. Deleting/revoking the row invalidates the cookie by policy.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub platform: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub never_expires: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && (self.never_expires || now < self.expires_at)
    }
}

// =============================================================================
// ADMIN BYPASS
// =============================================================================

/// Out-of-band super-user account, stored independently so access remains
/// possible when the identity provider is unavailable.
#[derive(Debug, Clone, FromRow)]
pub struct AdminAccount {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Never-expiring admin session, found by token digest.
#[derive(Debug, Clone, FromRow)]
pub struct AdminSession {
    pub id: Uuid,
    pub admin_id: Uuid,
    pub token_lookup: String,
    pub never_expires: bool,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

// =============================================================================
// EVENT LOG & OUTBOX
// =============================================================================

/// A row of the append-only event log.
///
/// `(aggregate_type, aggregate_id, version)` is unique and gap-free per
/// aggregate.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EventRow {
    pub event_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub version: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_key(now: DateTime<Utc>) -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            key_lookup: "digest".into(),
            prefix: "lano_live_".into(),
            user_id: Uuid::new_v4(),
            organization_id: None,
            name: "ci".into(),
            scopes: vec!["api:access".into()],
            expires_at: None,
            is_active: true,
            rotated_to: None,
            grace_until: None,
            last_used_at: None,
            created_at: now,
        }
    }

    #[test]
    fn test_api_key_usability() {
        let now = Utc::now();
        let key = base_key(now);
        assert!(key.is_usable(now));

        // Revoked key, no grace
        let mut revoked = base_key(now);
        revoked.is_active = false;
        assert!(!revoked.is_usable(now));

        // Rotated key inside its grace window
        let mut rotated = base_key(now);
        rotated.is_active = false;
        rotated.rotated_to = Some(Uuid::new_v4());
        rotated.grace_until = Some(now + Duration::minutes(5));
        assert!(rotated.is_usable(now));

        // Grace expired
        rotated.grace_until = Some(now - Duration::seconds(1));
        assert!(!rotated.is_usable(now));

        // Hard expiry beats everything
        let mut expired = base_key(now);
        expired.expires_at = Some(now - Duration::seconds(1));
        assert!(!expired.is_usable(now));
    }

    #[test]
    fn test_session_active() {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            platform: "web".into(),
            ip_address: None,
            user_agent: None,
            never_expires: false,
            created_at: now,
            last_used_at: now,
            expires_at: now + Duration::days(7),
            revoked_at: None,
        };
        assert!(session.is_active(now));

        let mut revoked = session.clone();
        revoked.revoked_at = Some(now);
        assert!(!revoked.is_active(now));

        let mut expired = session.clone();
        expired.expires_at = now - Duration::seconds(1);
        assert!(!expired.is_active(now));

        // Admin sessions outlive their expires_at
        let mut admin = session;
        admin.never_expires = true;
        admin.expires_at = now - Duration::days(1);
        assert!(admin.is_active(now));
    }

    #[test]
    fn test_token_active_iff_not_revoked_and_not_expired() {
        let now = Utc::now();
        let token = IssuedToken {
            id: Uuid::new_v4(),
            token_lookup: "digest".into(),
            token_hash: "digest".into(),
            token_type: token_type::ACCESS.into(),
            client_id: "cli".into(),
            user_id: Uuid::new_v4(),
            scope: vec![],
            expires_at: now + Duration::minutes(15),
            revoked: false,
            revoked_at: None,
            revoked_reason: None,
            parent_token_id: None,
            created_at: now,
        };
        assert!(token.is_active(now));
        assert!(!token.is_active(now + Duration::minutes(16)));

        let mut revoked = token;
        revoked.revoked = true;
        assert!(!revoked.is_active(now));
    }

    #[test]
    fn test_public_mcp_detection() {
        let client = OAuthClient {
            client_id: "mcp-integration".into(),
            client_secret_hash: None,
            client_type: "public".into(),
            application_type: "mcp".into(),
            require_pkce: true,
            allowed_code_challenge_methods: vec!["S256".into()],
            allowed_redirect_uris: vec![],
            allowed_scopes: vec![],
            default_scopes: vec![],
            status: client_status::ACTIVE.into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(client.is_public_mcp());

        let mut confidential = client.clone();
        confidential.client_type = "confidential".into();
        assert!(!confidential.is_public_mcp());
    }
}
