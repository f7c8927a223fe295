//! # Batch Claiming & Retry Schedule
//!
//! One drain cycle:
//!
//! ```text
//! BEGIN (primary);
//!   pg_try_advisory_xact_lock(BATCH_LOCK) ── held? → yield this cycle
//!   SELECT outbox ⋈ events
//!     WHERE status = 'pending' AND next_attempt_at <= NOW()
//!     ORDER BY id LIMIT 50
//!     FOR UPDATE OF outbox SKIP LOCKED;
//!   for each row:
//!     apply to read side (idempotent, keyed by event_id)
//!     ok  → status = 'sent'
//!     err → attempts += 1, next_attempt_at = now + backoff(attempts)
//!           attempts >= 5 → status = 'failed' (dead-letter)
//! COMMIT;
//! ```
//!
//! Outbox ordering is by `id` (insert order), which preserves per-aggregate
//! version order on the destination: an aggregate's events enter the outbox
//! in version order because the version is assigned in the producing
//! transaction.
//!
//! Failures never propagate to any API caller - the outbox *is* the retry
//! buffer.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use shared::errors::ApiError;
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::projection;

/// Advisory lock key for batch claiming; arbitrary but stable.
const BATCH_LOCK_KEY: i64 = 0x6c616e6f5f6f7578; // "lano_oux"

/// Maximum rows claimed per cycle.
const BATCH_SIZE: i64 = 50;

/// Attempts before a delivery dead-letters.
const MAX_ATTEMPTS: i32 = 5;

/// Base delay of the exponential backoff.
const BACKOFF_BASE_SECONDS: i64 = 5;

/// Backoff ceiling (5 minutes).
const BACKOFF_CAP_SECONDS: i64 = 300;

/// A claimed delivery: outbox row joined with its event.
#[derive(Debug, Clone, FromRow)]
pub struct ClaimedDelivery {
    pub outbox_id: i64,
    pub attempts: i32,
    pub event_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub version: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// The forwarder worker.
pub struct Forwarder {
    primary: PgPool,
    readside: PgPool,
}

impl Forwarder {
    pub fn new(primary: PgPool, readside: PgPool) -> Self {
        Self { primary, readside }
    }

    /// Runs one claim-deliver-mark cycle. Returns the number of
    /// successfully delivered events.
    pub async fn drain_cycle(&self) -> Result<u64, ApiError> {
        let mut tx = self.primary.begin().await?;

        // One instance claims per cycle; others skip rather than queue.
        let lock: (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock($1)")
            .bind(BATCH_LOCK_KEY)
            .fetch_one(&mut *tx)
            .await?;
        if !lock.0 {
            return Ok(0);
        }

        let batch: Vec<ClaimedDelivery> = sqlx::query_as(
            r#"
            SELECT o.id AS outbox_id, o.attempts,
                   e.event_id, e.aggregate_type, e.aggregate_id, e.version,
                   e.event_type, e.payload, e.metadata, e.occurred_at
            FROM auth.outbox o
            JOIN auth.events e ON e.event_id = o.event_id
            WHERE o.status = 'pending' AND o.next_attempt_at <= NOW()
            ORDER BY o.id
            LIMIT $1
            FOR UPDATE OF o SKIP LOCKED
            "#,
        )
        .bind(BATCH_SIZE)
        .fetch_all(&mut *tx)
        .await?;

        if batch.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let mut delivered = 0u64;

        for delivery in &batch {
            match projection::apply(&self.readside, delivery).await {
                Ok(()) => {
                    sqlx::query(
                        r#"
                        UPDATE auth.outbox
                        SET status = 'sent', sent_at = NOW(), last_error = NULL
                        WHERE id = $1
                        "#,
                    )
                    .bind(delivery.outbox_id)
                    .execute(&mut *tx)
                    .await?;
                    delivered += 1;
                }
                Err(e) => {
                    let attempts = delivery.attempts + 1;
                    let dead = attempts >= MAX_ATTEMPTS;
                    let next_attempt = Utc::now()
                        + ChronoDuration::seconds(backoff_seconds(attempts));

                    warn!(
                        event_id = %delivery.event_id,
                        attempts,
                        dead_letter = dead,
                        error = %e,
                        "Delivery failed"
                    );

                    sqlx::query(
                        r#"
                        UPDATE auth.outbox
                        SET attempts = $1,
                            next_attempt_at = $2,
                            last_error = $3,
                            status = CASE WHEN $4 THEN 'failed' ELSE 'pending' END
                        WHERE id = $5
                        "#,
                    )
                    .bind(attempts)
                    .bind(next_attempt)
                    .bind(e.to_string())
                    .bind(dead)
                    .bind(delivery.outbox_id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;

        Ok(delivered)
    }

    /// Prunes expired credentials and old delivered outbox rows.
    pub async fn housekeeping(&self) -> Result<(), ApiError> {
        let codes = sqlx::query(
            "DELETE FROM auth.authorization_codes WHERE expires_at < NOW() - INTERVAL '1 hour'",
        )
        .execute(&self.primary)
        .await?
        .rows_affected();

        let devices = sqlx::query(
            "DELETE FROM auth.device_authorizations WHERE expires_at < NOW() - INTERVAL '1 hour'",
        )
        .execute(&self.primary)
        .await?
        .rows_affected();

        let tokens = sqlx::query(
            "DELETE FROM auth.tokens WHERE expires_at < NOW() - INTERVAL '30 days'",
        )
        .execute(&self.primary)
        .await?
        .rows_affected();

        let outbox = sqlx::query(
            "DELETE FROM auth.outbox WHERE status = 'sent' AND sent_at < NOW() - INTERVAL '7 days'",
        )
        .execute(&self.primary)
        .await?
        .rows_affected();

        if codes + devices + tokens + outbox > 0 {
            info!(codes, devices, tokens, outbox, "Housekeeping pruned rows");
        }

        Ok(())
    }
}

/// Exponential backoff: 5s, 10s, 20s, 40s, ... capped at 5 minutes.
fn backoff_seconds(attempts: i32) -> i64 {
    let exponent = (attempts - 1).clamp(0, 30) as u32;
    (BACKOFF_BASE_SECONDS.saturating_mul(1i64 << exponent)).min(BACKOFF_CAP_SECONDS)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_seconds(1), 5);
        assert_eq!(backoff_seconds(2), 10);
        assert_eq!(backoff_seconds(3), 20);
        assert_eq!(backoff_seconds(4), 40);
        assert_eq!(backoff_seconds(5), 80);
    }

    #[test]
    fn test_backoff_caps_at_five_minutes() {
        assert_eq!(backoff_seconds(7), 300);
        assert_eq!(backoff_seconds(40), 300);
    }

    #[test]
    fn test_dead_letter_threshold() {
        // The fifth failure dead-letters
        assert_eq!(MAX_ATTEMPTS, 5);
    }
}
