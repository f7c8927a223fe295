//! # Domain Events
//!
//! Construction of event-log records. Every state-changing operation in the
//! OAuth engine, the login bridge and the API-key subsystem appends one of
//! these inside the **same transaction** as the state change, together with
//! exactly one outbox row (see the event repository).
//!
//! ## Event Catalog
//!
//! | Aggregate | Event types |
//! |-----------|-------------|
//! | `user` | `UserUpserted` |
//! | `session` | `SessionCreated`, `SessionRevoked` |
//! | `api_key` | `ApiKeyCreated`, `ApiKeyRotated`, `ApiKeyRevoked` |
//! | `oauth_client` | `ClientRegistered`, `ClientStatusChanged` |
//! | `oauth_token` | `TokenIssued`, `TokenRotated`, `TokenRevoked` |
//! | `audit` | `AuthEventLogged` |
//!
//! Audit facts (who did what, when, from where, success/failure) ride the
//! same log as `audit` aggregate events - there is no separate audit table
//! on the command side.
//!
//! Versions are per-aggregate, contiguous from 1, computed under an
//! advisory lock at append time; this module only carries the data.

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

/// Aggregate type spellings (must match the `auth.events` CHECK constraint).
pub mod aggregate {
    pub const USER: &str = "user";
    pub const SESSION: &str = "session";
    pub const API_KEY: &str = "api_key";
    pub const OAUTH_CLIENT: &str = "oauth_client";
    pub const OAUTH_TOKEN: &str = "oauth_token";
    pub const AUDIT: &str = "audit";
}

/// An event about to be appended; the repository assigns the version.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_id: Uuid,
    pub aggregate_type: &'static str,
    pub aggregate_id: String,
    pub event_type: &'static str,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
}

impl NewEvent {
    fn new(
        aggregate_type: &'static str,
        aggregate_id: String,
        event_type: &'static str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_type,
            aggregate_id,
            event_type,
            payload,
            metadata: json!({}),
        }
    }

    /// Attaches request metadata (caller IP, user agent) to the record.
    pub fn with_request_meta(mut self, ip: Option<&str>, user_agent: Option<&str>) -> Self {
        self.metadata = json!({
            "ip_address": ip,
            "user_agent": user_agent,
        });
        self
    }

    // =========================================================================
    // USER
    // =========================================================================

    /// Local registry row created or refreshed on successful login.
    pub fn user_upserted(user_id: Uuid, email: &str, role: &str, provider: Option<&str>) -> Self {
        Self::new(
            aggregate::USER,
            user_id.to_string(),
            "UserUpserted",
            json!({
                "user_id": user_id,
                "email": email,
                "role": role,
                "provider": provider,
            }),
        )
    }

    // =========================================================================
    // SESSION
    // =========================================================================

    pub fn session_created(
        session_id: Uuid,
        user_id: Uuid,
        platform: &str,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            aggregate::SESSION,
            session_id.to_string(),
            "SessionCreated",
            json!({
                "session_id": session_id,
                "user_id": user_id,
                "platform": platform,
                "expires_at": expires_at,
            }),
        )
    }

    pub fn session_revoked(session_id: Uuid, user_id: Uuid, reason: &str) -> Self {
        Self::new(
            aggregate::SESSION,
            session_id.to_string(),
            "SessionRevoked",
            json!({
                "session_id": session_id,
                "user_id": user_id,
                "reason": reason,
            }),
        )
    }

    // =========================================================================
    // API KEYS
    // =========================================================================

    pub fn api_key_created(key_id: Uuid, user_id: Uuid, name: &str, prefix: &str) -> Self {
        Self::new(
            aggregate::API_KEY,
            key_id.to_string(),
            "ApiKeyCreated",
            json!({
                "key_id": key_id,
                "user_id": user_id,
                "name": name,
                "prefix": prefix,
            }),
        )
    }

    pub fn api_key_rotated(old_key_id: Uuid, new_key_id: Uuid, user_id: Uuid) -> Self {
        Self::new(
            aggregate::API_KEY,
            old_key_id.to_string(),
            "ApiKeyRotated",
            json!({
                "key_id": old_key_id,
                "successor_key_id": new_key_id,
                "user_id": user_id,
            }),
        )
    }

    pub fn api_key_revoked(key_id: Uuid, user_id: Uuid) -> Self {
        Self::new(
            aggregate::API_KEY,
            key_id.to_string(),
            "ApiKeyRevoked",
            json!({
                "key_id": key_id,
                "user_id": user_id,
            }),
        )
    }

    /// A third-party credential was stored (or overwritten) in a project.
    /// The payload never includes the credential value, encrypted or not.
    pub fn stored_key_saved(key_id: Uuid, project_id: Uuid, name: &str, environment: &str) -> Self {
        Self::new(
            aggregate::API_KEY,
            key_id.to_string(),
            "StoredKeySaved",
            json!({
                "key_id": key_id,
                "project_id": project_id,
                "name": name,
                "environment": environment,
            }),
        )
    }

    pub fn stored_key_deleted(key_id: Uuid, project_id: Uuid) -> Self {
        Self::new(
            aggregate::API_KEY,
            key_id.to_string(),
            "StoredKeyDeleted",
            json!({
                "key_id": key_id,
                "project_id": project_id,
            }),
        )
    }

    // =========================================================================
    // OAUTH CLIENTS
    // =========================================================================

    pub fn client_registered(client_id: &str, client_type: &str, application_type: &str) -> Self {
        Self::new(
            aggregate::OAUTH_CLIENT,
            client_id.to_string(),
            "ClientRegistered",
            json!({
                "client_id": client_id,
                "client_type": client_type,
                "application_type": application_type,
            }),
        )
    }

    // =========================================================================
    // OAUTH TOKENS
    // =========================================================================

    /// A refresh/access pair was issued. The aggregate is the refresh token,
    /// the root of the pair's chain.
    pub fn token_issued(
        refresh_token_id: Uuid,
        access_token_id: Uuid,
        client_id: &str,
        user_id: Uuid,
        scope: &[String],
        grant: &str,
    ) -> Self {
        Self::new(
            aggregate::OAUTH_TOKEN,
            refresh_token_id.to_string(),
            "TokenIssued",
            json!({
                "refresh_token_id": refresh_token_id,
                "access_token_id": access_token_id,
                "client_id": client_id,
                "user_id": user_id,
                "scope": scope,
                "grant": grant,
            }),
        )
    }

    pub fn token_rotated(old_refresh_id: Uuid, new_refresh_id: Uuid, client_id: &str) -> Self {
        Self::new(
            aggregate::OAUTH_TOKEN,
            old_refresh_id.to_string(),
            "TokenRotated",
            json!({
                "refresh_token_id": old_refresh_id,
                "successor_refresh_id": new_refresh_id,
                "client_id": client_id,
            }),
        )
    }

    pub fn token_revoked(token_id: Uuid, user_id: Uuid, reason: &str, chain: bool) -> Self {
        Self::new(
            aggregate::OAUTH_TOKEN,
            token_id.to_string(),
            "TokenRevoked",
            json!({
                "token_id": token_id,
                "user_id": user_id,
                "reason": reason,
                "chain": chain,
            }),
        )
    }

    // =========================================================================
    // AUDIT
    // =========================================================================

    /// A free-form audit fact: who did what, from where, success/failure.
    ///
    /// The aggregate id is the acting user (or `anonymous` before a caller
    /// is known, e.g. failed logins).
    pub fn auth_event_logged(
        actor: Option<Uuid>,
        action: &str,
        success: bool,
        error_code: Option<&str>,
        ip: Option<&str>,
    ) -> Self {
        let aggregate_id = actor
            .map(|id| id.to_string())
            .unwrap_or_else(|| "anonymous".to_string());
        Self::new(
            aggregate::AUDIT,
            aggregate_id,
            "AuthEventLogged",
            json!({
                "user_id": actor,
                "action": action,
                "success": success,
                "error_code": error_code,
                "ip_address": ip,
            }),
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ids_are_unique() {
        let a = NewEvent::user_upserted(Uuid::new_v4(), "a@example.com", "user", None);
        let b = NewEvent::user_upserted(Uuid::new_v4(), "b@example.com", "user", None);
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn test_aggregate_assignment() {
        let user_id = Uuid::new_v4();
        let event = NewEvent::user_upserted(user_id, "a@example.com", "user", Some("supabase"));
        assert_eq!(event.aggregate_type, aggregate::USER);
        assert_eq!(event.aggregate_id, user_id.to_string());
        assert_eq!(event.event_type, "UserUpserted");
        assert_eq!(event.payload["email"], "a@example.com");
    }

    #[test]
    fn test_audit_event_without_actor() {
        let event = NewEvent::auth_event_logged(None, "web_login", false, Some("INVALID_CREDENTIALS"), None);
        assert_eq!(event.aggregate_id, "anonymous");
        assert_eq!(event.payload["success"], false);
    }

    #[test]
    fn test_request_meta_attachment() {
        let event = NewEvent::session_created(Uuid::new_v4(), Uuid::new_v4(), "web", Utc::now())
            .with_request_meta(Some("203.0.113.9"), Some("curl/8"));
        assert_eq!(event.metadata["ip_address"], "203.0.113.9");
        assert_eq!(event.metadata["user_agent"], "curl/8");
    }

    #[test]
    fn test_token_issued_roots_at_refresh() {
        let refresh = Uuid::new_v4();
        let access = Uuid::new_v4();
        let event = NewEvent::token_issued(
            refresh,
            access,
            "cli",
            Uuid::new_v4(),
            &["api:access".into()],
            "authorization_code",
        );
        assert_eq!(event.aggregate_id, refresh.to_string());
        assert_eq!(event.payload["grant"], "authorization_code");
    }
}
