//! # Event Log & Outbox Repository
//!
//! Transactional publication: every state change appends exactly one event
//! row and one pending outbox row **in the same transaction** as the change
//! itself. If the transaction rolls back, neither exists; if it commits,
//! the forwarder will eventually deliver the event to the read side.
//!
//! ## Gap-Free Versioning
//!
//! ```text
//! BEGIN;
//!   -- the state change (token insert, session revoke, ...)
//!   SELECT pg_advisory_xact_lock(hashtext($type), hashtext($id));
//!   next := COALESCE(MAX(version), 0) + 1  -- safe under the lock
//!   INSERT INTO auth.events (..., version = next);
//!   INSERT INTO auth.outbox (event_id, status = 'pending');
//! COMMIT;  -- lock released with the transaction
//! ```
//!
//! The advisory lock serializes writers of one aggregate, so versions are
//! contiguous from 1 with no gaps even under concurrency. Writers of
//! different aggregates don't contend.

use crate::domain::events::NewEvent;
use crate::domain::entities::EventRow;
use shared::errors::ApiError;
use sqlx::{PgConnection, PgPool};

/// Repository for `auth.events` and `auth.outbox`.
#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: PgPool,
}

/// Outbox depth surfaced by `/health`.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct OutboxDepth {
    pub pending: i64,
    pub failed: i64,
}

impl EventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends an event and enqueues its outbox row.
    ///
    /// Must run on the same transaction as the state change it describes.
    /// Takes the per-aggregate advisory lock, computes the next gap-free
    /// version, and inserts both rows.
    pub async fn append_with_outbox(
        conn: &mut PgConnection,
        event: NewEvent,
    ) -> Result<EventRow, ApiError> {
        // Serialize writers of this aggregate for the rest of the
        // transaction; released automatically at COMMIT/ROLLBACK.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))")
            .bind(event.aggregate_type)
            .bind(&event.aggregate_id)
            .execute(&mut *conn)
            .await?;

        let next_version: (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(MAX(version), 0) + 1
            FROM auth.events
            WHERE aggregate_type = $1 AND aggregate_id = $2
            "#,
        )
        .bind(event.aggregate_type)
        .bind(&event.aggregate_id)
        .fetch_one(&mut *conn)
        .await?;

        let row = sqlx::query_as::<_, EventRow>(
            r#"
            INSERT INTO auth.events (
                event_id, aggregate_type, aggregate_id, version,
                event_type, payload, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(event.event_id)
        .bind(event.aggregate_type)
        .bind(&event.aggregate_id)
        .bind(next_version.0)
        .bind(event.event_type)
        .bind(&event.payload)
        .bind(&event.metadata)
        .fetch_one(&mut *conn)
        .await?;

        // Exactly one delivery row per event, same transaction
        sqlx::query(
            r#"
            INSERT INTO auth.outbox (event_id)
            VALUES ($1)
            "#,
        )
        .bind(row.event_id)
        .execute(&mut *conn)
        .await?;

        Ok(row)
    }

    /// Current outbox depth, for the health surface.
    pub async fn outbox_depth(&self) -> Result<OutboxDepth, ApiError> {
        let row: (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM auth.outbox
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OutboxDepth {
            pending: row.0,
            failed: row.1,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_outbox_depth_serializes_for_health() {
        let depth = OutboxDepth {
            pending: 3,
            failed: 1,
        };
        let json = serde_json::to_value(depth).unwrap();
        assert_eq!(json["pending"], 3);
        assert_eq!(json["failed"], 1);
    }

    #[test]
    fn test_new_event_ready_for_append() {
        let event = NewEvent::user_upserted(Uuid::new_v4(), "a@example.com", "user", None);
        // Version is assigned at append time, not construction time
        assert_eq!(event.aggregate_type, "user");
        assert!(event.payload.is_object());
    }
}
