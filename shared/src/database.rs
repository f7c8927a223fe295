//! # PostgreSQL Connection Pools
//!
//! Database connection management using sqlx's async connection pool.
//!
//! Two pools exist in this system:
//!
//! | Pool | Owner | Purpose |
//! |------|-------|---------|
//! | Primary | both binaries | Command side: codes, tokens, keys, sessions, events, outbox |
//! | Read-side | outbox-forwarder only | Projection target (`auth_events` mirror + views) |
//!
//! The gateway never opens a read-side connection. Consumers that must see
//! revocations synchronously read only from the primary.
//!
//! ```text
//! ┌──────────────┐   primary    ┌──────────────┐
//! │ auth-gateway │─────────────▶│  Primary PG  │
//! └──────────────┘              └──────┬───────┘
//!                                      │ outbox rows
//! ┌──────────────────┐  primary        ▼
//! │ outbox-forwarder │────────▶ claim batch
//! │                  │  read-side   ┌──────────────┐
//! │                  │─────────────▶│ Read-side PG │
//! └──────────────────┘              └──────────────┘
//! ```
//!
//! ## Pool Configuration
//!
//! | Parameter | Default | Description |
//! |-----------|---------|-------------|
//! | `max_connections` | 10 | Maximum connections in pool |
//! | `min_connections` | 1 | Minimum connections to maintain |
//! | `connect_timeout` | 10s | Timeout for acquiring a connection |
//! | `idle_timeout` | 30s | Reap idle connections after this time |
//! | `max_lifetime` | 30min | Recycle connections after this time |

use crate::config::DatabaseConfig;
use crate::errors::ApiError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Pool Creation
// =============================================================================

/// Creates the primary-store connection pool.
///
/// Establishes the initial connections and validates connectivity. Call once
/// at application startup; `PgPool` is `Arc`-based and cheap to clone.
///
/// # Errors
///
/// Returns `ApiError::DatabaseError` if the URL is invalid, the database is
/// unreachable, or authentication fails.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, ApiError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connect_timeout_seconds = config.connect_timeout_seconds,
        "Creating primary database pool"
    );

    let pool = build_pool(config, &config.url).await?;

    info!("Primary database pool created");

    Ok(pool)
}

/// Creates the read-side pool for the outbox forwarder.
///
/// # Errors
///
/// Returns `ApiError::InternalError` when `readside_url` is unset - the
/// forwarder cannot run without its destination - or `DatabaseError` on
/// connection failure.
pub async fn create_readside_pool(config: &DatabaseConfig) -> Result<PgPool, ApiError> {
    let url = config
        .readside_url
        .as_deref()
        .ok_or_else(|| ApiError::InternalError {
            message: "readside_url is required for outbox delivery (set READSIDE_DATABASE_URL)"
                .to_string(),
        })?;

    info!("Creating read-side database pool");

    let pool = build_pool(config, url).await?;

    info!("Read-side database pool created");

    Ok(pool)
}

async fn build_pool(config: &DatabaseConfig, url: &str) -> Result<PgPool, ApiError> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
        .max_lifetime(Duration::from_secs(config.max_lifetime_seconds))
        // Verify connection is valid before handing it out
        .test_before_acquire(true)
        .connect(url)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create database pool");
            ApiError::DatabaseError(e)
        })
}

// =============================================================================
// Health Check
// =============================================================================

/// Verifies database connectivity.
///
/// Executes a `SELECT 1`; used by the `/health` endpoint and the forwarder's
/// startup check.
pub async fn health_check(pool: &PgPool) -> Result<(), ApiError> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(ApiError::DatabaseError)?;

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn config_without_readside() -> DatabaseConfig {
        DatabaseConfig {
            url: "postgres://u:p@localhost:5432/auth".into(),
            readside_url: None,
            max_connections: 10,
            min_connections: 1,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 30,
            max_lifetime_seconds: 1800,
        }
    }

    #[tokio::test]
    async fn test_readside_pool_requires_url() {
        let result = create_readside_pool(&config_without_readside()).await;
        assert!(matches!(result, Err(ApiError::InternalError { .. })));
    }

    // Connection tests require a live database and run as integration tests.
}
