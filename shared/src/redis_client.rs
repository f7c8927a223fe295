//! # Redis Client for Caching, Rate Limiting and Lockout Counters
//!
//! High-level Redis client shared by the gateway handlers.
//!
//! ## What Redis Holds Here
//!
//! | Use Case | Keys | Notes |
//! |----------|------|-------|
//! | **Client cache** | `oauth:client:{client_id}` | 1 h TTL, invalidated on client mutation |
//! | **In-flight code cache** | `oauth:code:{sha256}` | fast-path lookup for pending codes |
//! | **Rate limiting** | `ratelimit:{endpoint}:{ip}` | fixed-window INCR counters |
//! | **Failed-login lockout** | `failed_login:{identifier}` | 15-minute windows |
//!
//! Tokens are **never** cached: token lookups must observe revocations
//! immediately, so they always go to the store.
//!
//! The two *caches* are advisory - a miss or a Redis outage falls back to
//! the database, and every cache hit is re-validated for expiry before use.
//! The two *counter* families are not: they have no database fallback, so
//! their operations propagate Redis errors instead of pretending the count
//! is zero. A lockout check that cannot read its counter must fail closed -
//! the alternative is an outage silently switching off brute-force
//! protection.
//!
//! The rate-limit counters must also be shared across processes: a
//! per-process limiter would multiply every quota by the number of
//! replicas. INCR + EXPIRE gives an atomic fixed-window counter that all
//! instances agree on.
//!
//! ## Connection Management
//!
//! We use a `ConnectionManager` which automatically reconnects on failure.
//! This is more resilient than a simple connection for long-running services.

use crate::config::RedisConfig;
use crate::errors::ApiError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

// =============================================================================
// Redis Client
// =============================================================================

/// Async Redis client with automatic reconnection.
///
/// Safe to clone and share across tasks; cloning is an `Arc` clone.
#[derive(Clone)]
pub struct RedisClient {
    /// Connection manager for automatic reconnection
    conn: ConnectionManager,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Request is within quota.
    Allowed,
    /// Quota exceeded; retry after the given number of seconds.
    Limited { retry_after_seconds: u64 },
}

impl RedisClient {
    /// Creates a new Redis client and establishes the connection.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::RedisError` if the URL is invalid or the server
    /// is unreachable.
    pub async fn new(config: &RedisConfig) -> Result<Self, ApiError> {
        info!("Connecting to Redis");

        let client = redis::Client::open(config.url.as_str()).map_err(ApiError::RedisError)?;

        // Connection manager handles reconnection automatically
        let conn = ConnectionManager::new(client)
            .await
            .map_err(ApiError::RedisError)?;

        info!("Redis connection established");

        Ok(Self { conn })
    }

    // =========================================================================
    // Basic Operations
    // =========================================================================

    /// Stores a JSON-serialized value with optional TTL.
    pub async fn set<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), ApiError> {
        let serialized = serde_json::to_string(value).map_err(|e| ApiError::InternalError {
            message: e.to_string(),
        })?;

        let mut conn = self.conn.clone();

        match ttl {
            Some(duration) => {
                conn.set_ex::<_, _, ()>(key, &serialized, duration.as_secs())
                    .await
                    .map_err(ApiError::RedisError)?;
            }
            None => {
                conn.set::<_, _, ()>(key, &serialized)
                    .await
                    .map_err(ApiError::RedisError)?;
            }
        }

        Ok(())
    }

    /// Retrieves and deserializes a value.
    ///
    /// Returns `Ok(None)` when the key doesn't exist.
    pub async fn get<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ApiError> {
        let mut conn = self.conn.clone();

        let value: Option<String> = conn.get(key).await.map_err(ApiError::RedisError)?;

        match value {
            Some(s) => {
                let deserialized =
                    serde_json::from_str(&s).map_err(|e| ApiError::InternalError {
                        message: e.to_string(),
                    })?;
                Ok(Some(deserialized))
            }
            None => Ok(None),
        }
    }

    /// Deletes a key. Returns whether the key existed.
    pub async fn delete(&self, key: &str) -> Result<bool, ApiError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn.del(key).await.map_err(ApiError::RedisError)?;
        Ok(deleted > 0)
    }

    /// Checks whether a key exists.
    pub async fn exists(&self, key: &str) -> Result<bool, ApiError> {
        let mut conn = self.conn.clone();
        conn.exists(key).await.map_err(ApiError::RedisError)
    }

    /// Increments a counter atomically; creates the key at 1 if absent.
    pub async fn incr(&self, key: &str) -> Result<i64, ApiError> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1).await.map_err(ApiError::RedisError)
    }

    /// Sets TTL on an existing key.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, ApiError> {
        let mut conn = self.conn.clone();
        conn.expire(key, ttl.as_secs() as i64)
            .await
            .map_err(ApiError::RedisError)
    }

    /// Remaining TTL of a key in seconds; `None` when the key is absent or
    /// has no expiry.
    pub async fn ttl(&self, key: &str) -> Result<Option<u64>, ApiError> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn.ttl(key).await.map_err(ApiError::RedisError)?;
        if ttl < 0 {
            Ok(None)
        } else {
            Ok(Some(ttl as u64))
        }
    }

    /// Health check - verifies Redis is responding.
    pub async fn ping(&self) -> Result<(), ApiError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(ApiError::RedisError)?;
        Ok(())
    }

    // =========================================================================
    // Rate Limiting
    // =========================================================================

    /// Records a hit against `{endpoint}:{ip}` and decides whether the
    /// request is within quota.
    ///
    /// Fixed-window counting: the first hit creates the key with the window
    /// TTL; subsequent hits increment it. When the counter exceeds `limit`
    /// the caller gets the window's remaining TTL as `Retry-After`.
    ///
    /// ```rust,ignore
    /// match redis.rate_limit_hit("oauth_token", ip, 10, Duration::from_secs(60)).await? {
    ///     RateDecision::Allowed => {}
    ///     RateDecision::Limited { retry_after_seconds } => {
    ///         return Err(ApiError::TooManyRequests { retry_after_seconds });
    ///     }
    /// }
    /// ```
    pub async fn rate_limit_hit(
        &self,
        endpoint: &str,
        ip: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision, ApiError> {
        let key = format!("ratelimit:{}:{}", endpoint, ip);
        let count = self.incr(&key).await?;

        // First hit in the window sets the expiry
        if count == 1 {
            self.expire(&key, window).await?;
        }

        if count > limit as i64 {
            let retry_after_seconds = self.ttl(&key).await?.unwrap_or(window.as_secs());
            return Ok(RateDecision::Limited {
                retry_after_seconds,
            });
        }

        Ok(RateDecision::Allowed)
    }

    // =========================================================================
    // Failed-Login Lockout
    // =========================================================================

    /// Increments the failed-login counter for an identifier.
    ///
    /// Returns the new count. Use this to implement lockout:
    ///
    /// ```rust,ignore
    /// let count = redis.increment_failed_login(&email).await?;
    /// if count >= 5 {
    ///     return Err(ApiError::AccountLocked { until: ... });
    /// }
    /// ```
    ///
    /// The counter expires 15 minutes after the first failure. Errors
    /// propagate: an unrecordable failure must not look like a recorded
    /// one.
    pub async fn increment_failed_login(&self, identifier: &str) -> Result<i64, ApiError> {
        let key = format!("failed_login:{}", identifier);
        let count = self.incr(&key).await?;

        if count == 1 {
            self.expire(&key, Duration::from_secs(15 * 60)).await?;
        }

        Ok(count)
    }

    /// Current failed-login count for an identifier (0 when none recorded).
    ///
    /// Errors propagate - there is no database fallback for these
    /// counters, so an unreadable counter means lockout cannot be
    /// enforced and the caller must fail closed rather than assume zero.
    pub async fn get_failed_login_count(&self, identifier: &str) -> Result<i64, ApiError> {
        let key = format!("failed_login:{}", identifier);
        let mut conn = self.conn.clone();
        let count: Option<i64> = conn.get(&key).await.map_err(ApiError::RedisError)?;
        Ok(count.unwrap_or(0))
    }

    /// Resets the failed-login counter (call after a successful login).
    pub async fn reset_failed_login(&self, identifier: &str) -> Result<(), ApiError> {
        let key = format!("failed_login:{}", identifier);
        self.delete(&key).await?;
        Ok(())
    }
}

// Hide internal state in Debug output
impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient").finish_non_exhaustive()
    }
}
