//! # User, Session & Admin Repository
//!
//! Persistence for the local user registry (the stable FK target every
//! session, code and audit row hangs off), browser sessions, and the
//! out-of-band admin tables.
//!
//! ## Registry Upsert
//!
//! `upsert_user` runs on every successful login: first login creates the
//! row, later logins refresh `last_sign_in_at`, `provider` and `metadata`.
//! Emails are lowercased before they touch the unique index.
//!
//! ## Session Revocation Authority
//!
//! The cookie JWT references the user, not the session row. Cookie
//! verification therefore asks this repository whether the user still has
//! an active session; revoking the rows here is what makes logout take
//! effect immediately (testable property: a cookie presented after logout
//! is treated as unauthenticated).

use crate::domain::entities::{AdminAccount, AdminSession, Session, UserAccount};
use chrono::{DateTime, Utc};
use shared::errors::ApiError;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Repository for `auth.users`, `auth.sessions` and the admin tables.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: PgPool,
}

/// Parameters for creating a session row.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub platform: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub never_expires: bool,
    pub expires_at: DateTime<Utc>,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // USER REGISTRY
    // =========================================================================

    /// Creates or refreshes the local registry row for a user.
    ///
    /// Runs on the caller's transaction so the `UserUpserted` event commits
    /// with it.
    pub async fn upsert_user(
        conn: &mut PgConnection,
        user_id: Uuid,
        email: &str,
        role: &str,
        provider: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<UserAccount, ApiError> {
        let user = sqlx::query_as::<_, UserAccount>(
            r#"
            INSERT INTO auth.users (user_id, email, role, provider, last_sign_in_at, metadata)
            VALUES ($1, LOWER($2), $3, $4, NOW(), $5)
            ON CONFLICT (email) DO UPDATE
            SET role = EXCLUDED.role,
                provider = EXCLUDED.provider,
                last_sign_in_at = NOW(),
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(email)
        .bind(role)
        .bind(provider)
        .bind(metadata)
        .fetch_one(conn)
        .await?;

        Ok(user)
    }

    pub async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<UserAccount>, ApiError> {
        let user = sqlx::query_as::<_, UserAccount>(
            r#"
            SELECT * FROM auth.users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    // =========================================================================
    // SESSIONS
    // =========================================================================

    /// Creates a session row. Same transaction as the `SessionCreated`
    /// event.
    pub async fn create_session(
        conn: &mut PgConnection,
        new_session: NewSession,
    ) -> Result<Session, ApiError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO auth.sessions (
                user_id, platform, ip_address, user_agent, never_expires, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(new_session.user_id)
        .bind(&new_session.platform)
        .bind(&new_session.ip_address)
        .bind(&new_session.user_agent)
        .bind(new_session.never_expires)
        .bind(new_session.expires_at)
        .fetch_one(conn)
        .await?;

        Ok(session)
    }

    /// The user's most recent active session, if any.
    ///
    /// This is the server-side check behind every cookie presentation.
    pub async fn find_active_session(&self, user_id: Uuid) -> Result<Option<Session>, ApiError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM auth.sessions
            WHERE user_id = $1
              AND revoked_at IS NULL
              AND (never_expires OR expires_at > NOW())
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Refreshes `last_used_at` when a cookie satisfies a request.
    /// Best-effort.
    pub async fn touch_session(&self, session_id: Uuid) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE auth.sessions
            SET last_used_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Revokes all of a user's active sessions; returns the revoked ids so
    /// the caller can emit one `SessionRevoked` per row.
    pub async fn revoke_sessions_for_user(
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<Vec<Uuid>, ApiError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE auth.sessions
            SET revoked_at = NOW()
            WHERE user_id = $1 AND revoked_at IS NULL
            RETURNING id
            "#,
        )
        .bind(user_id)
        .fetch_all(conn)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    // =========================================================================
    // ADMIN BYPASS
    // =========================================================================

    pub async fn find_admin_by_email(&self, email: &str) -> Result<Option<AdminAccount>, ApiError> {
        let admin = sqlx::query_as::<_, AdminAccount>(
            r#"
            SELECT * FROM auth.admin_accounts
            WHERE email = LOWER($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(admin)
    }

    pub async fn update_admin_password(
        &self,
        admin_id: Uuid,
        password_hash: &str,
    ) -> Result<(), ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE auth.admin_accounts
            SET password_hash = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(password_hash)
        .bind(admin_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound {
                resource: format!("admin:{}", admin_id),
            });
        }

        Ok(())
    }

    /// Records a never-expiring admin session keyed by token digest.
    pub async fn create_admin_session(
        &self,
        admin_id: Uuid,
        token_lookup: &str,
    ) -> Result<AdminSession, ApiError> {
        let session = sqlx::query_as::<_, AdminSession>(
            r#"
            INSERT INTO auth.admin_sessions (admin_id, token_lookup)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(admin_id)
        .bind(token_lookup)
        .fetch_one(&self.pool)
        .await?;

        Ok(session)
    }

    /// Finds a live admin session by bearer-token digest.
    pub async fn find_admin_session(
        &self,
        token_lookup: &str,
    ) -> Result<Option<AdminSession>, ApiError> {
        let session = sqlx::query_as::<_, AdminSession>(
            r#"
            SELECT * FROM auth.admin_sessions
            WHERE token_lookup = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(token_lookup)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_session_struct() {
        let new_session = NewSession {
            user_id: Uuid::new_v4(),
            platform: "web".into(),
            ip_address: Some("203.0.113.9".into()),
            user_agent: Some("Mozilla/5.0".into()),
            never_expires: false,
            expires_at: Utc::now() + Duration::days(7),
        };
        assert_eq!(new_session.platform, "web");
        assert!(!new_session.never_expires);
    }
}
