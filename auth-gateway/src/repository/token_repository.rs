//! # Token Repository
//!
//! Persistence for access/refresh tokens and their chain relations.
//!
//! ## The Token Tree
//!
//! ```text
//! R0 (refresh) ──┬── A0 (access, parent = R0)
//!                └── R1 (refresh, parent = R0, reason R0 → rotated)
//!                       ├── A1 (access, parent = R1)
//!                       └── R2 (refresh, parent = R1)
//!                              └── ...
//! ```
//!
//! `parent_token_id` encodes the whole history as rows; chain revocation is
//! a recursive CTE over it. Revocation is monotonic: an already revoked row
//! keeps its original reason and timestamp.
//!
//! Tokens are **never cached** - every lookup goes to the store so
//! revocations are visible immediately.

use crate::domain::entities::IssuedToken;
use chrono::{DateTime, Utc};
use shared::errors::ApiError;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Repository for `auth.tokens`.
#[derive(Debug, Clone)]
pub struct TokenRepository {
    pool: PgPool,
}

/// Everything needed to insert a refresh + access pair in one transaction.
///
/// Hashes only - the raw values never reach this layer's storage.
#[derive(Debug, Clone)]
pub struct NewTokenPair {
    pub refresh_lookup: String,
    pub refresh_hash: String,
    pub access_lookup: String,
    pub access_hash: String,
    pub client_id: String,
    pub user_id: Uuid,
    pub scope: Vec<String>,
    pub refresh_expires_at: DateTime<Utc>,
    pub access_expires_at: DateTime<Utc>,
    /// For rotation: the refresh token this pair succeeds
    pub refresh_parent_id: Option<Uuid>,
}

/// Row ids of a freshly inserted pair.
#[derive(Debug, Clone, Copy)]
pub struct InsertedPair {
    pub refresh_token_id: Uuid,
    pub access_token_id: Uuid,
}

impl TokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // ISSUANCE
    // =========================================================================

    /// Inserts a refresh + access pair.
    ///
    /// Runs on the caller's transaction so the pair, the accompanying event
    /// and any rotation updates commit atomically. The access token's
    /// `parent_token_id` points at the new refresh row.
    pub async fn insert_pair(
        conn: &mut PgConnection,
        pair: NewTokenPair,
    ) -> Result<InsertedPair, ApiError> {
        let refresh_token_id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO auth.tokens (
                token_lookup, token_hash, token_type, client_id, user_id,
                scope, expires_at, parent_token_id
            )
            VALUES ($1, $2, 'refresh', $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&pair.refresh_lookup)
        .bind(&pair.refresh_hash)
        .bind(&pair.client_id)
        .bind(pair.user_id)
        .bind(&pair.scope)
        .bind(pair.refresh_expires_at)
        .bind(pair.refresh_parent_id)
        .fetch_one(&mut *conn)
        .await?;

        let access_token_id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO auth.tokens (
                token_lookup, token_hash, token_type, client_id, user_id,
                scope, expires_at, parent_token_id
            )
            VALUES ($1, $2, 'access', $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&pair.access_lookup)
        .bind(&pair.access_hash)
        .bind(&pair.client_id)
        .bind(pair.user_id)
        .bind(&pair.scope)
        .bind(pair.access_expires_at)
        .bind(refresh_token_id.0)
        .fetch_one(&mut *conn)
        .await?;

        Ok(InsertedPair {
            refresh_token_id: refresh_token_id.0,
            access_token_id: access_token_id.0,
        })
    }

    // =========================================================================
    // LOOKUP
    // =========================================================================

    /// Finds a token by its SHA-256 digest (introspection, revocation).
    ///
    /// Idempotent read: retried once on transient connection failures.
    /// Writes never get this treatment.
    pub async fn find_by_lookup(&self, lookup: &str) -> Result<Option<IssuedToken>, ApiError> {
        match self.fetch_by_lookup(lookup).await {
            Err(e) if e.is_transient() => self.fetch_by_lookup(lookup).await,
            other => other,
        }
    }

    async fn fetch_by_lookup(&self, lookup: &str) -> Result<Option<IssuedToken>, ApiError> {
        let token = sqlx::query_as::<_, IssuedToken>(
            r#"
            SELECT * FROM auth.tokens
            WHERE token_lookup = $1
            "#,
        )
        .bind(lookup)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    /// Locks a refresh-token row for the rotation transaction.
    ///
    /// Racing refresh grants serialize here, which is what turns the second
    /// presentation of the same token into a detectable replay instead of a
    /// double rotation.
    pub async fn lock_refresh_by_lookup(
        conn: &mut PgConnection,
        lookup: &str,
    ) -> Result<Option<IssuedToken>, ApiError> {
        let token = sqlx::query_as::<_, IssuedToken>(
            r#"
            SELECT * FROM auth.tokens
            WHERE token_lookup = $1 AND token_type = 'refresh'
            FOR UPDATE
            "#,
        )
        .bind(lookup)
        .fetch_optional(conn)
        .await?;

        Ok(token)
    }

    // =========================================================================
    // REVOCATION
    // =========================================================================

    /// Revokes a single token row. Monotonic: no-op on already revoked rows.
    pub async fn revoke_single(
        conn: &mut PgConnection,
        token_id: Uuid,
        reason: &str,
    ) -> Result<u64, ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE auth.tokens
            SET revoked = TRUE, revoked_at = NOW(), revoked_reason = $1
            WHERE id = $2 AND revoked = FALSE
            "#,
        )
        .bind(reason)
        .bind(token_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Revokes every descendant of a token (excluding the root itself).
    ///
    /// Walks the `parent_token_id` tree with a recursive CTE; used for
    /// rotation (`ancestor_rotated`) and for refresh-token revocation, where
    /// the whole family dies with the root.
    pub async fn revoke_descendants(
        conn: &mut PgConnection,
        root_id: Uuid,
        reason: &str,
    ) -> Result<u64, ApiError> {
        let result = sqlx::query(
            r#"
            WITH RECURSIVE chain AS (
                SELECT id FROM auth.tokens WHERE parent_token_id = $1
                UNION ALL
                SELECT t.id FROM auth.tokens t
                JOIN chain c ON t.parent_token_id = c.id
            )
            UPDATE auth.tokens
            SET revoked = TRUE, revoked_at = NOW(), revoked_reason = $2
            WHERE id IN (SELECT id FROM chain) AND revoked = FALSE
            "#,
        )
        .bind(root_id)
        .bind(reason)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Revokes a token and its full descendant chain with one reason.
    ///
    /// Used for replay defense (`replay_detected`) and explicit refresh
    /// revocation.
    pub async fn revoke_chain(
        conn: &mut PgConnection,
        root_id: Uuid,
        reason: &str,
    ) -> Result<u64, ApiError> {
        let root = Self::revoke_single(conn, root_id, reason).await?;
        let descendants = Self::revoke_descendants(conn, root_id, reason).await?;
        Ok(root + descendants)
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
    fn test_new_pair_hash_separation() {
        let now = Utc::now();
        let pair = NewTokenPair {
            refresh_lookup: "sha256-of-refresh".into(),
            refresh_hash: "$argon2id$...".into(),
            access_lookup: "sha256-of-access".into(),
            access_hash: "sha256-of-access".into(),
            client_id: "cli".into(),
            user_id: Uuid::new_v4(),
            scope: vec!["api:access".into()],
            refresh_expires_at: now + Duration::days(30),
            access_expires_at: now + Duration::minutes(15),
            refresh_parent_id: None,
        };

        // Refresh tokens carry a slow verification hash distinct from the
        // lookup digest; access tokens reuse the digest (fast path).
        assert_ne!(pair.refresh_lookup, pair.refresh_hash);
        assert_eq!(pair.access_lookup, pair.access_hash);
        assert!(pair.refresh_expires_at > pair.access_expires_at);
    }
}
