//! # Scope Filtering
//!
//! Allow-list filtering of requested scopes against a client's registration.
//!
//! Scopes are carried, not evaluated: this service filters requests against
//! allow-lists and records the result on tokens, but policy decisions belong
//! to downstream services.
//!
//! ## MCP Auto-Registration
//!
//! Public MCP clients get a fixed standard scope set implicitly added to
//! their allow-list. This is what lets MCP integrations self-register and
//! immediately request the scopes every MCP client needs, without an admin
//! editing the client row first.

use crate::domain::entities::OAuthClient;
use shared::errors::OAuthError;

/// The standard scope set every public MCP client may request.
pub const MCP_STANDARD_SCOPES: &[&str] = &[
    "mcp:full",
    "mcp:tools",
    "mcp:resources",
    "mcp:prompts",
    "mcp:connect",
    "api:access",
    "memories:read",
    "memories:write",
    "memories:delete",
    "profile",
];

/// Resolves the scopes a request is granted.
///
/// - No scopes requested → the client's `default_scopes`.
/// - Otherwise every requested scope must be inside the effective allow-list
///   (`allowed_scopes`, plus [`MCP_STANDARD_SCOPES`] for public MCP
///   clients); any scope outside it fails `invalid_scope`.
///
/// The requested order is preserved.
pub fn resolve_scopes(
    requested: Option<&str>,
    client: &OAuthClient,
) -> Result<Vec<String>, OAuthError> {
    let requested: Vec<&str> = requested
        .map(|s| s.split_whitespace().collect())
        .unwrap_or_default();

    if requested.is_empty() {
        return Ok(client.default_scopes.clone());
    }

    let mcp_bonus = client.is_public_mcp();

    let mut granted = Vec::with_capacity(requested.len());
    for scope in requested {
        let allowed = client.allowed_scopes.iter().any(|s| s == scope)
            || (mcp_bonus && MCP_STANDARD_SCOPES.contains(&scope));
        if !allowed {
            return Err(OAuthError::invalid_scope(format!(
                "Scope '{}' is not allowed for this client",
                scope
            )));
        }
        granted.push(scope.to_string());
    }

    Ok(granted)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::client_status;
    use chrono::Utc;

    fn client(client_type: &str, application_type: &str) -> OAuthClient {
        OAuthClient {
            client_id: "test-client".into(),
            client_secret_hash: None,
            client_type: client_type.into(),
            application_type: application_type.into(),
            require_pkce: true,
            allowed_code_challenge_methods: vec!["S256".into()],
            allowed_redirect_uris: vec![],
            allowed_scopes: vec!["profile".into(), "api:access".into()],
            default_scopes: vec!["profile".into()],
            status: client_status::ACTIVE.into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_request_uses_defaults() {
        let granted = resolve_scopes(None, &client("public", "web")).unwrap();
        assert_eq!(granted, vec!["profile".to_string()]);

        let granted = resolve_scopes(Some("   "), &client("public", "web")).unwrap();
        assert_eq!(granted, vec!["profile".to_string()]);
    }

    #[test]
    fn test_allowed_scopes_pass() {
        let granted =
            resolve_scopes(Some("profile api:access"), &client("public", "web")).unwrap();
        assert_eq!(granted, vec!["profile".to_string(), "api:access".to_string()]);
    }

    #[test]
    fn test_disallowed_scope_fails() {
        let err = resolve_scopes(Some("profile admin:god"), &client("public", "web")).unwrap_err();
        assert_eq!(err.kind, shared::errors::OAuthErrorKind::InvalidScope);
    }

    #[test]
    fn test_mcp_client_gets_standard_scopes() {
        // Not in allowed_scopes, but a public MCP client may request it
        let granted =
            resolve_scopes(Some("memories:read mcp:tools"), &client("public", "mcp")).unwrap();
        assert_eq!(
            granted,
            vec!["memories:read".to_string(), "mcp:tools".to_string()]
        );
    }

    #[test]
    fn test_confidential_mcp_gets_no_bonus() {
        let err = resolve_scopes(Some("memories:read"), &client("confidential", "mcp"))
            .unwrap_err();
        assert_eq!(err.kind, shared::errors::OAuthErrorKind::InvalidScope);
    }

    #[test]
    fn test_non_mcp_public_client_gets_no_bonus() {
        let err = resolve_scopes(Some("mcp:full"), &client("public", "cli")).unwrap_err();
        assert_eq!(err.kind, shared::errors::OAuthErrorKind::InvalidScope);
    }
}
