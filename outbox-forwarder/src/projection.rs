//! # Read-Side Projection
//!
//! Idempotent apply of one event to the read-side store. The mirror insert
//! and every projection update run in a single read-side transaction, and
//! the mirror's `event_id` primary key is the idempotency guard: a replayed
//! event inserts zero mirror rows and the apply short-circuits, so
//! delivering the same `event_id` twice yields the same destination state.
//!
//! ## Projections
//!
//! | Event | Effect |
//! |-------|--------|
//! | `UserUpserted` | upsert `users_current` |
//! | `SessionCreated` | insert `active_sessions` |
//! | `SessionRevoked` | delete from `active_sessions` |
//! | `ApiKeyCreated` | insert `active_api_keys` |
//! | `ApiKeyRotated` / `ApiKeyRevoked` | delete from `active_api_keys` |
//! | everything else (tokens, clients, stored keys, audit) | `audit_trail` row |
//!
//! Unknown event types are mirrored and audited, never dropped - a newer
//! gateway must be deployable before a newer forwarder.

use shared::errors::ApiError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::forwarder::ClaimedDelivery;

/// Applies one event to the read side. Idempotent by `event_id`.
pub async fn apply(readside: &PgPool, delivery: &ClaimedDelivery) -> Result<(), ApiError> {
    let mut tx = readside.begin().await?;

    // Mirror insert doubles as the idempotency check
    let inserted = sqlx::query(
        r#"
        INSERT INTO auth_events (
            event_id, aggregate_type, aggregate_id, version,
            event_type, payload, metadata, occurred_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(delivery.event_id)
    .bind(&delivery.aggregate_type)
    .bind(&delivery.aggregate_id)
    .bind(delivery.version)
    .bind(&delivery.event_type)
    .bind(&delivery.payload)
    .bind(&delivery.metadata)
    .bind(delivery.occurred_at)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    // Already applied in a previous (partially acknowledged) delivery
    if inserted == 0 {
        tx.commit().await?;
        return Ok(());
    }

    let payload = &delivery.payload;

    match delivery.event_type.as_str() {
        "UserUpserted" => {
            sqlx::query(
                r#"
                INSERT INTO users_current (user_id, email, role, last_sign_in_at, updated_at)
                VALUES ($1, $2, $3, $4, NOW())
                ON CONFLICT (user_id) DO UPDATE
                SET email = EXCLUDED.email,
                    role = EXCLUDED.role,
                    last_sign_in_at = EXCLUDED.last_sign_in_at,
                    updated_at = NOW()
                "#,
            )
            .bind(payload_uuid(payload, "user_id")?)
            .bind(payload_str(payload, "email")?)
            .bind(payload_str(payload, "role")?)
            .bind(delivery.occurred_at)
            .execute(&mut *tx)
            .await?;
        }
        "SessionCreated" => {
            sqlx::query(
                r#"
                INSERT INTO active_sessions (session_id, user_id, platform, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (session_id) DO NOTHING
                "#,
            )
            .bind(payload_uuid(payload, "session_id")?)
            .bind(payload_uuid(payload, "user_id")?)
            .bind(payload["platform"].as_str())
            .bind(delivery.occurred_at)
            .bind(
                payload["expires_at"]
                    .as_str()
                    .and_then(|v| v.parse::<chrono::DateTime<chrono::Utc>>().ok()),
            )
            .execute(&mut *tx)
            .await?;
        }
        "SessionRevoked" => {
            sqlx::query("DELETE FROM active_sessions WHERE session_id = $1")
                .bind(payload_uuid(payload, "session_id")?)
                .execute(&mut *tx)
                .await?;
        }
        "ApiKeyCreated" => {
            sqlx::query(
                r#"
                INSERT INTO active_api_keys (key_id, user_id, name, prefix, created_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (key_id) DO NOTHING
                "#,
            )
            .bind(payload_uuid(payload, "key_id")?)
            .bind(payload_uuid(payload, "user_id")?)
            .bind(payload_str(payload, "name")?)
            .bind(payload_str(payload, "prefix")?)
            .bind(delivery.occurred_at)
            .execute(&mut *tx)
            .await?;
        }
        "ApiKeyRotated" | "ApiKeyRevoked" => {
            sqlx::query("DELETE FROM active_api_keys WHERE key_id = $1")
                .bind(payload_uuid(payload, "key_id")?)
                .execute(&mut *tx)
                .await?;
        }
        // Token lifecycle, client registrations, stored-key mutations and
        // explicit audit facts all land in the audit trail
        _ => {}
    }

    // Every event leaves an audit-trail row; the UNIQUE(event_id) keeps
    // replays from duplicating entries.
    sqlx::query(
        r#"
        INSERT INTO audit_trail (event_id, user_id, action, ip_address, success, error_code, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(delivery.event_id)
    .bind(payload["user_id"].as_str().and_then(|v| v.parse::<Uuid>().ok()))
    .bind(audit_action(delivery))
    .bind(
        payload["ip_address"]
            .as_str()
            .or_else(|| delivery.metadata["ip_address"].as_str()),
    )
    .bind(payload["success"].as_bool())
    .bind(payload["error_code"].as_str())
    .bind(delivery.occurred_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(())
}

/// The audit-trail action label: explicit for audit events, the event type
/// for everything else.
fn audit_action(delivery: &ClaimedDelivery) -> String {
    if delivery.event_type == "AuthEventLogged" {
        delivery.payload["action"]
            .as_str()
            .unwrap_or("AuthEventLogged")
            .to_string()
    } else {
        delivery.event_type.clone()
    }
}

fn payload_str<'a>(payload: &'a serde_json::Value, field: &str) -> Result<&'a str, ApiError> {
    payload[field].as_str().ok_or_else(|| ApiError::InternalError {
        message: format!("Event payload missing '{field}'"),
    })
}

fn payload_uuid(payload: &serde_json::Value, field: &str) -> Result<Uuid, ApiError> {
    payload_str(payload, field)?
        .parse()
        .map_err(|_| ApiError::InternalError {
            message: format!("Event payload field '{field}' is not a UUID"),
        })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn delivery(event_type: &str, payload: serde_json::Value) -> ClaimedDelivery {
        ClaimedDelivery {
            outbox_id: 1,
            attempts: 0,
            event_id: Uuid::new_v4(),
            aggregate_type: "audit".into(),
            aggregate_id: "anonymous".into(),
            version: 1,
            event_type: event_type.into(),
            payload,
            metadata: serde_json::json!({}),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_audit_action_prefers_explicit_action() {
        let explicit = delivery(
            "AuthEventLogged",
            serde_json::json!({ "action": "web_login", "success": true }),
        );
        assert_eq!(audit_action(&explicit), "web_login");

        let implicit = delivery("TokenRevoked", serde_json::json!({}));
        assert_eq!(audit_action(&implicit), "TokenRevoked");
    }

    #[test]
    fn test_payload_extractors() {
        let payload = serde_json::json!({
            "user_id": "550e8400-e29b-41d4-a716-446655440000",
            "email": "user@example.com",
        });

        assert_eq!(payload_str(&payload, "email").unwrap(), "user@example.com");
        assert_eq!(
            payload_uuid(&payload, "user_id").unwrap().to_string(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
        assert!(payload_str(&payload, "missing").is_err());
        assert!(payload_uuid(&payload, "email").is_err());
    }
}
