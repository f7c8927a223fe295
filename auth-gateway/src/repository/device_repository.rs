//! # Device Authorization Repository
//!
//! Persistence for RFC 8628 device-flow state.
//!
//! Poll pacing lives in the row: `last_polled_at` is compared against
//! `interval_seconds` under a row lock, so two racing polls can't both slip
//! under the interval, and a `slow_down` penalty (+5s) is durable across
//! gateway instances.

use crate::domain::entities::DeviceAuthorization;
use chrono::{DateTime, Utc};
use shared::errors::ApiError;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Increment applied to the advertised interval on each `slow_down`.
pub const SLOW_DOWN_DELTA_SECONDS: i32 = 5;

/// Repository for `auth.device_authorizations`.
#[derive(Debug, Clone)]
pub struct DeviceRepository {
    pool: PgPool,
}

/// Parameters for starting a device authorization.
#[derive(Debug, Clone)]
pub struct NewDeviceAuthorization {
    pub device_code_lookup: String,
    pub device_code_hash: String,
    pub user_code: String,
    pub client_id: String,
    pub scope: Vec<String>,
    pub verification_uri: String,
    pub interval_seconds: i32,
    pub expires_at: DateTime<Utc>,
}

impl DeviceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a new pending device authorization.
    ///
    /// # Errors
    ///
    /// `ApiError::Conflict` when the generated user code collides with
    /// another pending authorization (caller regenerates and retries).
    pub async fn create(
        &self,
        new_device: NewDeviceAuthorization,
    ) -> Result<DeviceAuthorization, ApiError> {
        let device = sqlx::query_as::<_, DeviceAuthorization>(
            r#"
            INSERT INTO auth.device_authorizations (
                device_code_lookup, device_code_hash, user_code, client_id,
                scope, verification_uri, interval_seconds, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&new_device.device_code_lookup)
        .bind(&new_device.device_code_hash)
        .bind(&new_device.user_code)
        .bind(&new_device.client_id)
        .bind(&new_device.scope)
        .bind(&new_device.verification_uri)
        .bind(new_device.interval_seconds)
        .bind(new_device.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("idx_device_user_code_pending") {
                    return ApiError::Conflict {
                        resource: "user_code".to_string(),
                    };
                }
            }
            ApiError::DatabaseError(e)
        })?;

        Ok(device)
    }

    /// Locks the device row for a token poll or an approval decision.
    pub async fn lock_by_lookup(
        conn: &mut PgConnection,
        device_code_lookup: &str,
    ) -> Result<Option<DeviceAuthorization>, ApiError> {
        let device = sqlx::query_as::<_, DeviceAuthorization>(
            r#"
            SELECT * FROM auth.device_authorizations
            WHERE device_code_lookup = $1
            FOR UPDATE
            "#,
        )
        .bind(device_code_lookup)
        .fetch_optional(conn)
        .await?;

        Ok(device)
    }

    /// Finds a *pending* authorization by its human-entered code
    /// (case-insensitive), locking it for the approval decision.
    pub async fn lock_pending_by_user_code(
        conn: &mut PgConnection,
        user_code: &str,
    ) -> Result<Option<DeviceAuthorization>, ApiError> {
        let device = sqlx::query_as::<_, DeviceAuthorization>(
            r#"
            SELECT * FROM auth.device_authorizations
            WHERE UPPER(user_code) = UPPER($1) AND status = 'pending'
            FOR UPDATE
            "#,
        )
        .bind(user_code)
        .fetch_optional(conn)
        .await?;

        Ok(device)
    }

    /// Records a poll and optionally bumps the interval (slow_down penalty).
    pub async fn record_poll(
        conn: &mut PgConnection,
        id: Uuid,
        bump_interval: bool,
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE auth.device_authorizations
            SET last_polled_at = NOW(),
                interval_seconds = interval_seconds + CASE WHEN $2 THEN $3 ELSE 0 END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(bump_interval)
        .bind(SLOW_DOWN_DELTA_SECONDS)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Transitions the authorization's status.
    ///
    /// Approval also records the approving user. Transitions out of a
    /// terminal state are refused by the `WHERE` clause.
    pub async fn set_status(
        conn: &mut PgConnection,
        id: Uuid,
        status: &str,
        user_id: Option<Uuid>,
    ) -> Result<u64, ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE auth.device_authorizations
            SET status = $1, user_id = COALESCE($2, user_id)
            WHERE id = $3
              AND status NOT IN ('denied', 'consumed')
            "#,
        )
        .bind(status)
        .bind(user_id)
        .bind(id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::device_status;
    use chrono::Duration;

    #[test]
    fn test_slow_down_delta_is_fixed() {
        // Wire-visible polling contract: each slow_down adds 5 seconds
        assert_eq!(SLOW_DOWN_DELTA_SECONDS, 5);
    }

    #[test]
    fn test_new_device_struct() {
        let new_device = NewDeviceAuthorization {
            device_code_lookup: "sha256-digest".into(),
            device_code_hash: "$argon2id$...".into(),
            user_code: "ABCD-1234".into(),
            client_id: "vscode-extension".into(),
            scope: vec!["memories:read".into(), "memories:write".into()],
            verification_uri: "https://auth.example.com/web/device".into(),
            interval_seconds: 5,
            expires_at: Utc::now() + Duration::minutes(15),
        };
        assert_eq!(new_device.user_code.len(), 9);
        assert_eq!(new_device.interval_seconds, 5);
    }

    #[test]
    fn test_status_constants_match_schema() {
        assert_eq!(device_status::PENDING, "pending");
        assert_eq!(device_status::APPROVED, "approved");
        assert_eq!(device_status::DENIED, "denied");
        assert_eq!(device_status::EXPIRED, "expired");
        assert_eq!(device_status::CONSUMED, "consumed");
    }
}
