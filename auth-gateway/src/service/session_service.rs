//! # Session & Login Bridge
//!
//! The browser login that feeds `/oauth/authorize`. Password verification
//! is delegated to the external [`IdentityProvider`]; this service owns the
//! local registry upsert, the session row, and the signed cookie payloads.
//!
//! ## Login Flow
//!
//! ```text
//! POST /web/login {email, password}
//!   │ lockout check (redis failed_login counter)
//!   │ IdentityProvider.verify_password ──── wrong → count failure, 401
//!   ▼
//! BEGIN;
//!   upsert auth.users          + UserUpserted event
//!   insert auth.sessions       + SessionCreated event
//! COMMIT;
//!   reset failure counter, sign session JWT
//!   Set-Cookie: lanonasis_session (HttpOnly) + lanonasis_user (readable)
//!   302 → sanitized return_to, or the dashboard
//! ```
//!
//! ## Cookie Verification
//!
//! The JWT payload references the **user**; the session row is the
//! revocation authority. Every cookie presentation re-checks that an
//! active session exists server-side, so `GET /web/logout` invalidates
//! outstanding cookies immediately.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use shared::auth::jwt::JwtService;
use shared::errors::ApiError;
use shared::redis_client::RedisClient;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::domain::entities::{Session, UserAccount};
use crate::domain::events::NewEvent;
use crate::repository::user_repository::NewSession;
use crate::repository::{EventRepository, UserRepository};
use crate::service::identity_provider::IdentityProvider;
use crate::service::oauth_service::RequestContext;

/// HTTP-only cookie carrying the signed session JWT.
pub const SESSION_COOKIE: &str = "lanonasis_session";

/// Script-readable companion cookie with `{id, email, role}` for UI
/// convenience. Never trusted server-side.
pub const USER_COOKIE: &str = "lanonasis_user";

/// Failed attempts before an identifier locks.
const LOCKOUT_THRESHOLD: i64 = 5;

/// Lockout window length.
const LOCKOUT_WINDOW_MINUTES: i64 = 15;

/// Result of a successful login, ready for cookie assembly in the handler.
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub user: UserAccount,
    pub session: Session,
    /// Signed JWT for `lanonasis_session`
    pub session_token: String,
}

/// User resolved from a presented session cookie.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: Uuid,
    pub email: String,
}

/// The login bridge service.
#[derive(Clone)]
pub struct SessionService {
    pool: PgPool,
    users: UserRepository,
    jwt_service: Arc<JwtService>,
    identity: Arc<dyn IdentityProvider>,
    redis: RedisClient,
    dashboard_url: String,
    cookie_domain: String,
}

impl SessionService {
    pub fn new(
        pool: PgPool,
        users: UserRepository,
        jwt_service: Arc<JwtService>,
        identity: Arc<dyn IdentityProvider>,
        redis: RedisClient,
        dashboard_url: String,
        cookie_domain: String,
    ) -> Self {
        Self {
            pool,
            users,
            jwt_service,
            identity,
            redis,
            dashboard_url,
            cookie_domain,
        }
    }

    // =========================================================================
    // LOGIN
    // =========================================================================

    /// Verifies credentials, upserts the registry row, creates the session
    /// and returns the signed cookie payload.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        platform: &str,
        ctx: &RequestContext,
    ) -> Result<LoginResult, ApiError> {
        let email = email.to_lowercase();

        // Lockout before the (expensive) provider round-trip. Counter
        // errors propagate - with Redis down, lockout cannot be enforced
        // and logins fail closed instead of silently unprotected.
        let failures = self.redis.get_failed_login_count(&email).await?;
        if failures >= LOCKOUT_THRESHOLD {
            warn!(email = %email, "Login attempt while locked out");
            return Err(ApiError::AccountLocked {
                until: Utc::now() + ChronoDuration::minutes(LOCKOUT_WINDOW_MINUTES),
            });
        }

        let identity = match self.identity.verify_password(&email, password).await? {
            Some(identity) => identity,
            None => {
                // Same error for "no such user" and "wrong password":
                // prevents account enumeration. The failure must be
                // recorded before it can be reported.
                let count = self.redis.increment_failed_login(&email).await?;
                warn!(email = %email, failures = count, "Failed login attempt");
                self.append_audit(
                    None,
                    "web_login",
                    false,
                    Some("INVALID_CREDENTIALS"),
                    ctx,
                )
                .await;
                return Err(ApiError::InvalidCredentials);
            }
        };

        let role = identity.role.as_deref().unwrap_or("user");
        let expires_at = session_expiry(Utc::now(), self.jwt_service.session_ttl_seconds());

        let mut tx = self.pool.begin().await?;

        let user = UserRepository::upsert_user(
            &mut tx,
            identity.id,
            &identity.email,
            role,
            Some("identity-provider"),
            serde_json::json!({}),
        )
        .await?;

        EventRepository::append_with_outbox(
            &mut tx,
            NewEvent::user_upserted(user.user_id, &user.email, &user.role, user.provider.as_deref()),
        )
        .await?;

        let session = UserRepository::create_session(
            &mut tx,
            NewSession {
                user_id: user.user_id,
                platform: platform.to_string(),
                ip_address: ctx.ip_address.clone(),
                user_agent: ctx.user_agent.clone(),
                never_expires: false,
                expires_at,
            },
        )
        .await?;

        EventRepository::append_with_outbox(
            &mut tx,
            NewEvent::session_created(session.id, user.user_id, platform, expires_at)
                .with_request_meta(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
        )
        .await?;

        EventRepository::append_with_outbox(
            &mut tx,
            NewEvent::auth_event_logged(
                Some(user.user_id),
                "web_login",
                true,
                None,
                ctx.ip_address.as_deref(),
            ),
        )
        .await?;

        tx.commit().await?;

        // Best-effort: a stale counter can only lock out sooner, never
        // weaken the protection
        if let Err(e) = self.redis.reset_failed_login(&email).await {
            warn!(error = %e, "Failed to reset login-failure counter");
        }

        let session_token = self.jwt_service.generate_session_token(
            user.user_id,
            &user.email,
            &user.role,
            platform,
        )?;

        info!(user_id = %user.user_id, platform = %platform, "User logged in");

        Ok(LoginResult {
            user,
            session,
            session_token,
        })
    }

    // =========================================================================
    // COOKIE RESOLUTION
    // =========================================================================

    /// Resolves the end-user from a presented session-cookie JWT.
    ///
    /// Verifies the signature AND the server-side session record - a valid
    /// JWT whose sessions were revoked resolves to `None`. Refreshes the
    /// session's `last_used_at` as a side effect.
    pub async fn resolve_session_user(
        &self,
        cookie_value: &str,
    ) -> Result<Option<SessionUser>, ApiError> {
        let claims = match self.jwt_service.validate_session_token(cookie_value) {
            Ok(claims) => claims,
            // Expired or tampered cookie: unauthenticated, not an error
            Err(_) => return Ok(None),
        };

        let Some(session) = self.users.find_active_session(claims.sub).await? else {
            return Ok(None);
        };

        if let Err(e) = self.users.touch_session(session.id).await {
            warn!(error = %e, "Failed to refresh session last_used_at");
        }

        Ok(Some(SessionUser {
            user_id: claims.sub,
            email: claims.email,
        }))
    }

    // =========================================================================
    // LOGOUT
    // =========================================================================

    /// Revokes the user's sessions; outstanding cookies become dead on the
    /// next presentation.
    pub async fn logout(&self, user_id: Uuid, ctx: &RequestContext) -> Result<u64, ApiError> {
        let mut tx = self.pool.begin().await?;

        let revoked = UserRepository::revoke_sessions_for_user(&mut tx, user_id).await?;
        for session_id in &revoked {
            EventRepository::append_with_outbox(
                &mut tx,
                NewEvent::session_revoked(*session_id, user_id, "logout"),
            )
            .await?;
        }

        EventRepository::append_with_outbox(
            &mut tx,
            NewEvent::auth_event_logged(
                Some(user_id),
                "web_logout",
                true,
                None,
                ctx.ip_address.as_deref(),
            ),
        )
        .await?;

        tx.commit().await?;

        info!(user_id = %user_id, sessions = revoked.len(), "User logged out");

        Ok(revoked.len() as u64)
    }

    // =========================================================================
    // RETURN-TO SANITIZATION
    // =========================================================================

    /// Sanitizes a `return_to` target against the configured cookie domain.
    /// See [`sanitize_return_to`].
    pub fn sanitize_return_to(&self, return_to: Option<&str>) -> String {
        sanitize_return_to(return_to, &self.cookie_domain, &self.dashboard_url)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Appends a standalone audit event (own short transaction).
    /// Best-effort: an audit failure must not mask the original outcome.
    async fn append_audit(
        &self,
        actor: Option<Uuid>,
        action: &str,
        success: bool,
        error_code: Option<&str>,
        ctx: &RequestContext,
    ) {
        let result: Result<(), ApiError> = async {
            let mut tx = self.pool.begin().await?;
            EventRepository::append_with_outbox(
                &mut tx,
                NewEvent::auth_event_logged(
                    actor,
                    action,
                    success,
                    error_code,
                    ctx.ip_address.as_deref(),
                ),
            )
            .await?;
            tx.commit().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, action = action, "Failed to append audit event");
        }
    }
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("cookie_domain", &self.cookie_domain)
            .finish_non_exhaustive()
    }
}

/// Expiry helper shared with the handlers' cookie assembly.
pub fn session_expiry(now: DateTime<Utc>, ttl_seconds: u64) -> DateTime<Utc> {
    now + ChronoDuration::seconds(ttl_seconds as i64)
}

/// Sanitizes a `return_to` target.
///
/// Accepted: site-relative paths, and absolute URLs on the configured
/// cookie domain (or a subdomain of it). Everything else falls back to the
/// dashboard - an open redirect through the login page would make phishing
/// trivial.
pub fn sanitize_return_to(
    return_to: Option<&str>,
    cookie_domain: &str,
    dashboard_url: &str,
) -> String {
    let Some(candidate) = return_to.filter(|v| !v.is_empty()) else {
        return dashboard_url.to_string();
    };

    // Site-relative (but not scheme-relative `//host`)
    if candidate.starts_with('/') && !candidate.starts_with("//") {
        return candidate.to_string();
    }

    let Ok(parsed) = Url::parse(candidate) else {
        return dashboard_url.to_string();
    };

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return dashboard_url.to_string();
    }

    let base_domain = cookie_domain.trim_start_matches('.');
    match parsed.host_str() {
        Some(host) if host == base_domain || host.ends_with(&format!(".{base_domain}")) => {
            candidate.to_string()
        }
        _ => dashboard_url.to_string(),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = ".example.com";
    const DASHBOARD: &str = "https://dashboard.example.com";

    #[test]
    fn test_sanitize_relative_path_allowed() {
        assert_eq!(
            sanitize_return_to(Some("/oauth/authorize?client_id=cli"), DOMAIN, DASHBOARD),
            "/oauth/authorize?client_id=cli"
        );
    }

    #[test]
    fn test_sanitize_scheme_relative_rejected() {
        assert_eq!(
            sanitize_return_to(Some("//evil.com/phish"), DOMAIN, DASHBOARD),
            DASHBOARD
        );
    }

    #[test]
    fn test_sanitize_same_domain_allowed() {
        assert_eq!(
            sanitize_return_to(Some("https://app.example.com/settings"), DOMAIN, DASHBOARD),
            "https://app.example.com/settings"
        );
        assert_eq!(
            sanitize_return_to(Some("https://example.com/"), DOMAIN, DASHBOARD),
            "https://example.com/"
        );
    }

    #[test]
    fn test_sanitize_foreign_domain_rejected() {
        assert_eq!(
            sanitize_return_to(Some("https://evil.com/"), DOMAIN, DASHBOARD),
            DASHBOARD
        );
        // Suffix tricks don't pass the registrable-domain check
        assert_eq!(
            sanitize_return_to(Some("https://notexample.com/"), DOMAIN, DASHBOARD),
            DASHBOARD
        );
    }

    #[test]
    fn test_sanitize_non_http_scheme_rejected() {
        assert_eq!(
            sanitize_return_to(Some("javascript:alert(1)"), DOMAIN, DASHBOARD),
            DASHBOARD
        );
    }

    #[test]
    fn test_sanitize_absent_falls_back_to_dashboard() {
        assert_eq!(sanitize_return_to(None, DOMAIN, DASHBOARD), DASHBOARD);
        assert_eq!(sanitize_return_to(Some(""), DOMAIN, DASHBOARD), DASHBOARD);
    }

    #[test]
    fn test_session_expiry_offset() {
        let now = Utc::now();
        assert_eq!(session_expiry(now, 604800), now + ChronoDuration::days(7));
    }

    #[test]
    fn test_cookie_names_are_the_wire_contract() {
        assert_eq!(SESSION_COOKIE, "lanonasis_session");
        assert_eq!(USER_COOKIE, "lanonasis_user");
    }
}
