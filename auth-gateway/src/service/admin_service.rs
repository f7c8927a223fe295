//! # Admin Bypass
//!
//! Out-of-band super-user path, deliberately self-contained: it reads only
//! the admin tables and signs its own tokens, so it keeps working when the
//! identity provider and the outbox destination are both down. (Events
//! still append to the primary store; the forwarder catches up whenever it
//! returns.)
//!
//! Wrong credentials earn the same failed-attempt backoff as the web login:
//! five misses lock the identifier for fifteen minutes.

use chrono::{Duration as ChronoDuration, Utc};
use shared::auth::jwt::JwtService;
use shared::auth::password::PasswordHasher;
use shared::auth::tokens::{generate_opaque_token, sha256_hex};
use shared::errors::ApiError;
use shared::redis_client::RedisClient;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::entities::{AdminSession, OAuthClient};
use crate::domain::events::NewEvent;
use crate::repository::client_repository::NewClient;
use crate::repository::{ClientRepository, EventRepository, UserRepository};
use crate::service::oauth_service::RequestContext;

const LOCKOUT_THRESHOLD: i64 = 5;
const LOCKOUT_WINDOW_MINUTES: i64 = 15;

/// Result of a successful bypass login.
#[derive(Debug, Clone)]
pub struct AdminLoginResult {
    /// Bearer token for the admin endpoints; its session never expires
    pub token: String,
    pub admin_id: uuid::Uuid,
    pub email: String,
}

/// Result of registering an application.
#[derive(Debug, Clone)]
pub struct RegisteredApp {
    pub client: OAuthClient,
    /// One-shot secret, confidential clients only; never retrievable again
    pub client_secret: Option<String>,
}

/// Parameters for `POST /admin/register-app`.
#[derive(Debug, Clone)]
pub struct RegisterAppParams {
    pub client_id: String,
    pub client_type: String,
    pub application_type: String,
    pub require_pkce: bool,
    pub allowed_code_challenge_methods: Vec<String>,
    pub allowed_redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub default_scopes: Vec<String>,
}

/// The admin bypass service.
#[derive(Clone)]
pub struct AdminService {
    pool: PgPool,
    users: UserRepository,
    clients: ClientRepository,
    jwt_service: Arc<JwtService>,
    /// Full-cost Argon2id profile - these are real passwords
    password_hasher: PasswordHasher,
    redis: RedisClient,
}

impl AdminService {
    pub fn new(
        pool: PgPool,
        users: UserRepository,
        clients: ClientRepository,
        jwt_service: Arc<JwtService>,
        redis: RedisClient,
    ) -> Self {
        Self {
            pool,
            users,
            clients,
            jwt_service,
            password_hasher: PasswordHasher::new(),
            redis,
        }
    }

    // =========================================================================
    // BYPASS LOGIN
    // =========================================================================

    /// Credential check against `auth.admin_accounts`; success mints a
    /// bearer token backed by a never-expiring admin session.
    pub async fn bypass_login(
        &self,
        email: &str,
        password: &str,
        ctx: &RequestContext,
    ) -> Result<AdminLoginResult, ApiError> {
        let identifier = format!("admin:{}", email.to_lowercase());

        // Counter errors propagate: the bypass path fails closed rather
        // than running without brute-force protection.
        let failures = self.redis.get_failed_login_count(&identifier).await?;
        if failures >= LOCKOUT_THRESHOLD {
            warn!(email = %email, "Admin bypass attempt while locked out");
            return Err(ApiError::AccountLocked {
                until: Utc::now() + ChronoDuration::minutes(LOCKOUT_WINDOW_MINUTES),
            });
        }

        let admin = self.users.find_admin_by_email(email).await?;

        let verified = match &admin {
            Some(account) => self
                .password_hasher
                .verify(password, &account.password_hash)?,
            // Hash anyway so unknown emails cost the same as wrong
            // passwords (no account enumeration via timing)
            None => {
                let _ = self.password_hasher.hash(password);
                false
            }
        };

        if !verified {
            // The failure must be recorded before it can be reported
            let count = self.redis.increment_failed_login(&identifier).await?;
            warn!(email = %email, failures = count, "Failed admin bypass attempt");
            self.append_audit(None, "admin_bypass_login", false, Some("INVALID_CREDENTIALS"), ctx)
                .await;
            return Err(ApiError::InvalidCredentials);
        }

        let admin = admin.expect("verified implies account");

        let token = self
            .jwt_service
            .generate_admin_session_token(admin.id, &admin.email)?;

        self.users
            .create_admin_session(admin.id, &sha256_hex(&token))
            .await?;

        // Best-effort: a stale counter can only lock out sooner, never
        // weaken the protection
        if let Err(e) = self.redis.reset_failed_login(&identifier).await {
            warn!(error = %e, "Failed to reset login-failure counter");
        }

        self.append_audit(Some(admin.id), "admin_bypass_login", true, None, ctx)
            .await;

        info!(admin_id = %admin.id, "Admin bypass login");

        Ok(AdminLoginResult {
            token,
            admin_id: admin.id,
            email: admin.email,
        })
    }

    /// Authenticates the admin bearer: valid signature AND a live admin
    /// session row for the token's digest.
    pub async fn authenticate_admin(&self, bearer_token: &str) -> Result<AdminSession, ApiError> {
        let claims = self.jwt_service.validate_session_token(bearer_token)?;
        if claims.role != "admin" {
            return Err(ApiError::AccessDenied);
        }

        self.users
            .find_admin_session(&sha256_hex(bearer_token))
            .await?
            .ok_or(ApiError::InvalidToken)
    }

    // =========================================================================
    // PASSWORD CHANGE
    // =========================================================================

    /// Changes the authenticated admin's password.
    pub async fn change_password(
        &self,
        session: &AdminSession,
        new_password: &str,
        ctx: &RequestContext,
    ) -> Result<(), ApiError> {
        let hash = self.password_hasher.hash(new_password)?;
        self.users
            .update_admin_password(session.admin_id, &hash)
            .await?;

        self.append_audit(Some(session.admin_id), "admin_change_password", true, None, ctx)
            .await;

        info!(admin_id = %session.admin_id, "Admin password changed");

        Ok(())
    }

    // =========================================================================
    // APP REGISTRATION
    // =========================================================================

    /// Registers an OAuth client. Confidential clients get a one-shot
    /// secret: the raw value is in this response and nowhere else.
    pub async fn register_app(
        &self,
        params: RegisterAppParams,
        session: &AdminSession,
        ctx: &RequestContext,
    ) -> Result<RegisteredApp, ApiError> {
        let (raw_secret, secret_hash) = if params.client_type == "confidential" {
            let secret = generate_opaque_token();
            let hash = PasswordHasher::credential().hash(&secret)?;
            (Some(secret), Some(hash))
        } else {
            (None, None)
        };

        let client = self
            .clients
            .create(NewClient {
                client_id: params.client_id,
                client_secret_hash: secret_hash,
                client_type: params.client_type,
                application_type: params.application_type,
                require_pkce: params.require_pkce,
                allowed_code_challenge_methods: params.allowed_code_challenge_methods,
                allowed_redirect_uris: params.allowed_redirect_uris,
                allowed_scopes: params.allowed_scopes,
                default_scopes: params.default_scopes,
            })
            .await?;

        // The registration event rides its own transaction; the client row
        // is already committed by the repository.
        let result: Result<(), ApiError> = async {
            let mut tx = self.pool.begin().await?;
            EventRepository::append_with_outbox(
                &mut tx,
                NewEvent::client_registered(
                    &client.client_id,
                    &client.client_type,
                    &client.application_type,
                )
                .with_request_meta(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
            )
            .await?;
            tx.commit().await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to append ClientRegistered event");
        }

        info!(
            client_id = %client.client_id,
            admin_id = %session.admin_id,
            "OAuth client registered"
        );

        Ok(RegisteredApp {
            client,
            client_secret: raw_secret,
        })
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    async fn append_audit(
        &self,
        actor: Option<uuid::Uuid>,
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

impl std::fmt::Debug for AdminService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminService").finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_app_params_shape() {
        let params = RegisterAppParams {
            client_id: "Dashboard-Web".into(),
            client_type: "confidential".into(),
            application_type: "web".into(),
            require_pkce: true,
            allowed_code_challenge_methods: vec!["S256".into()],
            allowed_redirect_uris: vec!["https://dashboard.example.com/callback".into()],
            allowed_scopes: vec!["profile".into()],
            default_scopes: vec!["profile".into()],
        };
        assert_eq!(params.client_type, "confidential");
    }
}
