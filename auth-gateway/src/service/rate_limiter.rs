//! # Per-Endpoint Rate Limiting
//!
//! Fixed-window quotas keyed by `(endpoint, ip)`, counted in Redis so every
//! gateway replica sees the same numbers. A per-process limiter is
//! explicitly not acceptable here - it would multiply each quota by the
//! replica count.
//!
//! ## Default Quotas
//!
//! | Endpoint | Limit |
//! |----------|-------|
//! | `web_login` (POST) | 5 / 15 min |
//! | `oauth_authorize` | 10 / min |
//! | `oauth_token` | 10 / min (all grants) |
//! | `oauth_revoke` | 20 / min |
//! | `admin_bypass` | 5 / 15 min |
//! | everything else under `/api` | configurable, default 100 / 15 min |
//!
//! Exceeding a quota is a 429 with `Retry-After` carrying the window's
//! remaining seconds.

use shared::errors::ApiError;
use shared::redis_client::{RateDecision, RedisClient};
use std::time::Duration;

/// Named quota classes. Handlers pick the class; the limiter owns the
/// numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    WebLogin,
    OAuthAuthorize,
    OAuthToken,
    OAuthRevoke,
    AdminBypass,
    Api,
}

impl Endpoint {
    /// Counter-key segment for this class.
    fn key(&self) -> &'static str {
        match self {
            Self::WebLogin => "web_login",
            Self::OAuthAuthorize => "oauth_authorize",
            Self::OAuthToken => "oauth_token",
            Self::OAuthRevoke => "oauth_revoke",
            Self::AdminBypass => "admin_bypass",
            Self::Api => "api",
        }
    }
}

/// Redis-backed fixed-window limiter.
#[derive(Clone)]
pub struct RateLimiter {
    redis: RedisClient,
    /// Window for the general `/api` bucket
    api_window: Duration,
    /// Quota for the general `/api` bucket
    api_max_requests: u32,
}

impl RateLimiter {
    pub fn new(redis: RedisClient, api_window_ms: u64, api_max_requests: u32) -> Self {
        Self {
            redis,
            api_window: Duration::from_millis(api_window_ms),
            api_max_requests,
        }
    }

    /// Quota for an endpoint class: `(limit, window)`.
    fn quota(&self, endpoint: Endpoint) -> (u32, Duration) {
        match endpoint {
            Endpoint::WebLogin => (5, Duration::from_secs(15 * 60)),
            Endpoint::OAuthAuthorize => (10, Duration::from_secs(60)),
            Endpoint::OAuthToken => (10, Duration::from_secs(60)),
            Endpoint::OAuthRevoke => (20, Duration::from_secs(60)),
            Endpoint::AdminBypass => (5, Duration::from_secs(15 * 60)),
            Endpoint::Api => (self.api_max_requests, self.api_window),
        }
    }

    /// Records a hit and rejects with 429 (+ `Retry-After`) when the window
    /// quota is exceeded.
    pub async fn check(&self, endpoint: Endpoint, ip: &str) -> Result<(), ApiError> {
        let (limit, window) = self.quota(endpoint);

        match self
            .redis
            .rate_limit_hit(endpoint.key(), ip, limit, window)
            .await?
        {
            RateDecision::Allowed => Ok(()),
            RateDecision::Limited {
                retry_after_seconds,
            } => Err(ApiError::TooManyRequests {
                retry_after_seconds,
            }),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("api_max_requests", &self.api_max_requests)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keys_are_distinct() {
        let endpoints = [
            Endpoint::WebLogin,
            Endpoint::OAuthAuthorize,
            Endpoint::OAuthToken,
            Endpoint::OAuthRevoke,
            Endpoint::AdminBypass,
            Endpoint::Api,
        ];
        let mut keys: Vec<&str> = endpoints.iter().map(|e| e.key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), endpoints.len());
    }
}
