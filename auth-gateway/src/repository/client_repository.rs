//! # OAuth Client Repository
//!
//! Persistence for registered applications. Reads go through a Redis
//! read-through cache (1 hour TTL) because the client row is consulted on
//! every authorize and token request; any mutation invalidates the cached
//! entry before committing the change is visible.
//!
//! `client_id` is case-insensitive: values are lowercased on write and on
//! lookup.

use crate::domain::entities::{client_status, OAuthClient};
use shared::errors::ApiError;
use shared::redis_client::RedisClient;
use sqlx::PgPool;
use std::time::Duration;
use tracing::warn;

/// Cache TTL for client rows.
const CLIENT_CACHE_TTL: Duration = Duration::from_secs(3600);

fn cache_key(client_id: &str) -> String {
    format!("oauth:client:{}", client_id)
}

/// Repository for `auth.oauth_clients` with a read-through cache.
#[derive(Clone)]
pub struct ClientRepository {
    pool: PgPool,
    redis: RedisClient,
}

/// Parameters for registering a new client (admin `register-app`).
#[derive(Debug, Clone)]
pub struct NewClient {
    pub client_id: String,
    pub client_secret_hash: Option<String>,
    pub client_type: String,
    pub application_type: String,
    pub require_pkce: bool,
    pub allowed_code_challenge_methods: Vec<String>,
    pub allowed_redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub default_scopes: Vec<String>,
}

impl ClientRepository {
    pub fn new(pool: PgPool, redis: RedisClient) -> Self {
        Self { pool, redis }
    }

    /// Finds a client by id: cache first, then store.
    ///
    /// Cache failures are advisory - a Redis outage degrades to plain store
    /// reads. `None` means no such client.
    pub async fn find_by_id(&self, client_id: &str) -> Result<Option<OAuthClient>, ApiError> {
        let client_id = client_id.to_lowercase();
        let key = cache_key(&client_id);

        match self.redis.get::<OAuthClient>(&key).await {
            Ok(Some(client)) => return Ok(Some(client)),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Client cache read failed; falling back to store"),
        }

        // Idempotent read: retried once on transient connection failures
        let client = match self.fetch_from_store(&client_id).await {
            Err(e) if e.is_transient() => self.fetch_from_store(&client_id).await?,
            other => other?,
        };

        if let Some(ref client) = client {
            if let Err(e) = self.redis.set(&key, client, Some(CLIENT_CACHE_TTL)).await {
                warn!(error = %e, "Client cache write failed");
            }
        }

        Ok(client)
    }

    async fn fetch_from_store(&self, client_id: &str) -> Result<Option<OAuthClient>, ApiError> {
        let client = sqlx::query_as::<_, OAuthClient>(
            r#"
            SELECT * FROM auth.oauth_clients
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(client)
    }

    /// Registers a new client.
    ///
    /// # Errors
    ///
    /// `ApiError::Conflict` when the client id is already taken.
    pub async fn create(&self, new_client: NewClient) -> Result<OAuthClient, ApiError> {
        let client = sqlx::query_as::<_, OAuthClient>(
            r#"
            INSERT INTO auth.oauth_clients (
                client_id, client_secret_hash, client_type, application_type,
                require_pkce, allowed_code_challenge_methods,
                allowed_redirect_uris, allowed_scopes, default_scopes, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(new_client.client_id.to_lowercase())
        .bind(&new_client.client_secret_hash)
        .bind(&new_client.client_type)
        .bind(&new_client.application_type)
        .bind(new_client.require_pkce)
        .bind(&new_client.allowed_code_challenge_methods)
        .bind(&new_client.allowed_redirect_uris)
        .bind(&new_client.allowed_scopes)
        .bind(&new_client.default_scopes)
        .bind(client_status::ACTIVE)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("oauth_clients_pkey") {
                    return ApiError::Conflict {
                        resource: "client_id".to_string(),
                    };
                }
            }
            ApiError::DatabaseError(e)
        })?;

        // A stale negative entry could otherwise hide the new client
        self.invalidate_cache(&client.client_id).await;

        Ok(client)
    }

    /// Drops the cached entry for a client. Best-effort: a failed
    /// invalidation only extends staleness to the TTL horizon.
    pub async fn invalidate_cache(&self, client_id: &str) {
        if let Err(e) = self.redis.delete(&cache_key(client_id)).await {
            warn!(client_id = %client_id, error = %e, "Client cache invalidation failed");
        }
    }
}

impl std::fmt::Debug for ClientRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRepository").finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_shape() {
        assert_eq!(cache_key("vscode-ext"), "oauth:client:vscode-ext");
    }

    #[test]
    fn test_new_client_struct() {
        let new_client = NewClient {
            client_id: "CLI-Tool".into(),
            client_secret_hash: None,
            client_type: "public".into(),
            application_type: "cli".into(),
            require_pkce: true,
            allowed_code_challenge_methods: vec!["S256".into()],
            allowed_redirect_uris: vec!["http://localhost:8888/callback".into()],
            allowed_scopes: vec!["api:access".into()],
            default_scopes: vec![],
        };
        assert!(new_client.client_secret_hash.is_none());
        assert_eq!(new_client.allowed_redirect_uris.len(), 1);
    }
}
