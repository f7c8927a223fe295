//! # Authorization Code Repository
//!
//! Persistence for one-time authorization codes.
//!
//! ## The Consume Invariant
//!
//! At most one successful token exchange per code, even under concurrent
//! requests. The exchange transaction takes a row lock on the hashed code
//! (`SELECT ... FOR UPDATE`), re-checks `consumed`/expiry under the lock,
//! and flips `consumed` before committing. Two racing exchanges serialize on
//! the lock: the second sees `consumed = true` and fails `invalid_grant`.
//!
//! ## Caching
//!
//! Freshly issued codes are cached under `oauth:code:{sha256}` for the
//! fast-path existence check; the cache entry dies with the code's TTL and
//! is dropped on consume. The cache is advisory only - the consume path
//! always goes to the store.

use crate::domain::entities::{AuthorizationCode, NewAuthorizationCode};
use shared::errors::ApiError;
use shared::redis_client::RedisClient;
use sqlx::{PgConnection, PgPool};
use std::time::Duration;
use tracing::warn;

fn cache_key(code_lookup: &str) -> String {
    format!("oauth:code:{}", code_lookup)
}

/// Repository for `auth.authorization_codes`.
#[derive(Clone)]
pub struct CodeRepository {
    pool: PgPool,
    redis: RedisClient,
}

impl CodeRepository {
    pub fn new(pool: PgPool, redis: RedisClient) -> Self {
        Self { pool, redis }
    }

    /// Inserts a new authorization code and caches its digest.
    ///
    /// One row per authorize grant; the raw code was already hashed by the
    /// caller and is not seen here.
    pub async fn create(
        &self,
        new_code: NewAuthorizationCode,
        ttl: Duration,
    ) -> Result<AuthorizationCode, ApiError> {
        let code = sqlx::query_as::<_, AuthorizationCode>(
            r#"
            INSERT INTO auth.authorization_codes (
                code_lookup, code_hash, client_id, user_id, redirect_uri,
                scope, state, code_challenge, code_challenge_method,
                expires_at, ip_address, user_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(&new_code.code_lookup)
        .bind(&new_code.code_hash)
        .bind(&new_code.client_id)
        .bind(new_code.user_id)
        .bind(&new_code.redirect_uri)
        .bind(&new_code.scope)
        .bind(&new_code.state)
        .bind(&new_code.code_challenge)
        .bind(&new_code.code_challenge_method)
        .bind(new_code.expires_at)
        .bind(&new_code.ip_address)
        .bind(&new_code.user_agent)
        .fetch_one(&self.pool)
        .await?;

        if let Err(e) = self
            .redis
            .set(&cache_key(&code.code_lookup), &true, Some(ttl))
            .await
        {
            warn!(error = %e, "Code cache write failed");
        }

        Ok(code)
    }

    /// Locks the code row for the exchange transaction.
    ///
    /// Returns the row as it stands *under the lock*; the caller re-checks
    /// client, redirect URI, consumption and expiry before flipping
    /// `consumed`. `None` means no such code exists.
    pub async fn lock_by_lookup(
        conn: &mut PgConnection,
        code_lookup: &str,
    ) -> Result<Option<AuthorizationCode>, ApiError> {
        let code = sqlx::query_as::<_, AuthorizationCode>(
            r#"
            SELECT * FROM auth.authorization_codes
            WHERE code_lookup = $1
            FOR UPDATE
            "#,
        )
        .bind(code_lookup)
        .fetch_optional(conn)
        .await?;

        Ok(code)
    }

    /// Flips `consumed` false→true. Must run under the row lock taken by
    /// [`Self::lock_by_lookup`] in the same transaction.
    pub async fn mark_consumed(conn: &mut PgConnection, id: uuid::Uuid) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE auth.authorization_codes
            SET consumed = TRUE, consumed_at = NOW()
            WHERE id = $1 AND consumed = FALSE
            "#,
        )
        .bind(id)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Drops the cached digest after consumption (best-effort).
    pub async fn drop_cache(&self, code_lookup: &str) {
        if let Err(e) = self.redis.delete(&cache_key(code_lookup)).await {
            warn!(error = %e, "Code cache delete failed");
        }
    }
}

impl std::fmt::Debug for CodeRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeRepository").finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_cache_key_shape() {
        assert_eq!(cache_key("abc123"), "oauth:code:abc123");
    }

    #[test]
    fn test_new_code_struct_carries_both_hashes() {
        let new_code = NewAuthorizationCode {
            code_lookup: "sha256-digest".into(),
            code_hash: "$argon2id$...".into(),
            client_id: "cli".into(),
            user_id: Uuid::new_v4(),
            redirect_uri: "http://localhost:8888/callback".into(),
            scope: vec!["api:access".into()],
            state: Some("xyz".into()),
            code_challenge: Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".into()),
            code_challenge_method: Some("S256".into()),
            expires_at: Utc::now(),
            ip_address: None,
            user_agent: None,
        };
        assert_ne!(new_code.code_lookup, new_code.code_hash);
        assert!(new_code.code_hash.starts_with("$argon2id$"));
    }
}
