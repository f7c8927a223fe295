//! # Health & Introspection Surface
//!
//! `GET /health`: liveness plus the two dependency checks that matter
//! operationally - primary database reachability and outbox depth. A
//! non-zero `failed` count means dead-lettered deliveries waiting for an
//! operator.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use shared::database;
use sqlx::PgPool;
use tracing::warn;

use crate::api::dto::{HealthResponse, OutboxHealth};
use crate::AppState;

/// `GET /health`.
///
/// 200 `healthy` when everything is up and no dead letters exist;
/// 503 `degraded` when the database is unreachable or the outbox holds
/// failed rows. Redis being down degrades caches and rate limits but not
/// correctness, so it is reported without flipping the status.
pub async fn health_check(
    state: web::Data<AppState>,
    pool: web::Data<PgPool>,
) -> HttpResponse {
    let database_up = database::health_check(&pool).await.is_ok();

    let redis_up = state.redis.ping().await.is_ok();

    let outbox = if database_up {
        match state.event_repository.outbox_depth().await {
            Ok(depth) => OutboxHealth {
                pending: depth.pending,
                failed: depth.failed,
            },
            Err(e) => {
                warn!(error = %e, "Failed to read outbox depth");
                OutboxHealth {
                    pending: -1,
                    failed: -1,
                }
            }
        }
    } else {
        OutboxHealth {
            pending: -1,
            failed: -1,
        }
    };

    let healthy = database_up && outbox.failed == 0;

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        service: state.config.service_name.clone(),
        timestamp: Utc::now().to_rfc3339(),
        database: if database_up { "up" } else { "down" }.to_string(),
        redis: if redis_up { "up" } else { "down" }.to_string(),
        outbox,
    };

    if healthy {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}
