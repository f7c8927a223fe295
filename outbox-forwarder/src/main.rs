//! # Outbox Forwarder
//!
//! The background half of the CQRS split: drains `auth.outbox` from the
//! primary store and applies each event to the read-side store's
//! `auth_events` mirror and projection views.
//!
//! ```text
//! ┌─────────────┐   claim batch (FOR UPDATE SKIP LOCKED)   ┌────────────┐
//! │ Primary PG  │◀─────────────────────────────────────────│  forwarder │
//! │ auth.outbox │                                          │   loop     │
//! └─────────────┘   mark sent / schedule retry             └─────┬──────┘
//!                                                                │ idempotent
//!                                                                ▼ apply
//!                                                         ┌──────────────┐
//!                                                         │ Read-side PG │
//!                                                         │ auth_events  │
//!                                                         │ projections  │
//!                                                         └──────────────┘
//! ```
//!
//! ## Delivery Contract
//!
//! - Claim up to 50 `pending` rows whose `next_attempt_at ≤ now`, under a
//!   batch advisory lock plus `FOR UPDATE SKIP LOCKED` so concurrent
//!   forwarder instances never double-deliver.
//! - Apply each event idempotently, keyed by `event_id` (replays are
//!   no-ops on the destination).
//! - Success → `sent`. Failure → exponential backoff capped at 5 minutes;
//!   after 5 attempts → `failed` (dead-letter, visible via the gateway's
//!   `/health`).
//!
//! The gateway never reads from the read side; anything that must observe
//! revocations synchronously stays on the primary.
//!
//! ## Housekeeping
//!
//! Between drain cycles the forwarder also prunes long-expired
//! authorization codes, device authorizations and tokens, and `sent`
//! outbox rows older than a week.

use shared::{config::GatewayConfig, database, tracing_config};
use std::time::Duration;
use tracing::{error, info};

mod forwarder;
mod projection;

use forwarder::Forwarder;

/// Seconds between drain cycles.
const POLL_INTERVAL_SECONDS: u64 = 5;

/// Drain cycles between housekeeping passes (~5 minutes).
const HOUSEKEEPING_EVERY: u32 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration & logging
    // ─────────────────────────────────────────────────────────────────────
    let config = GatewayConfig::from_env().expect("Failed to load configuration");
    config
        .validate()
        .expect("Configuration rejected; refusing to start");

    tracing_config::init_tracing(
        "outbox-forwarder",
        config.json_logs(),
        config.log_level.as_deref(),
    );

    // ─────────────────────────────────────────────────────────────────────
    // Pools: primary (claim) + read side (apply)
    // ─────────────────────────────────────────────────────────────────────
    let primary = database::create_pool(&config.database)
        .await
        .expect("Failed to connect to primary store");
    let readside = database::create_readside_pool(&config.database)
        .await
        .expect("Failed to connect to read-side store");

    info!("Outbox forwarder starting");

    let forwarder = Forwarder::new(primary.clone(), readside.clone());

    // ─────────────────────────────────────────────────────────────────────
    // Drain loop with graceful shutdown
    // ─────────────────────────────────────────────────────────────────────
    let mut ticker = tokio::time::interval(Duration::from_secs(POLL_INTERVAL_SECONDS));
    let mut cycles: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match forwarder.drain_cycle().await {
                    Ok(delivered) if delivered > 0 => {
                        info!(delivered, "Drain cycle complete");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Drain cycle failed"),
                }

                cycles = cycles.wrapping_add(1);
                if cycles % HOUSEKEEPING_EVERY == 0 {
                    if let Err(e) = forwarder.housekeeping().await {
                        error!(error = %e, "Housekeeping failed");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received; draining stops");
                break;
            }
        }
    }

    primary.close().await;
    readside.close().await;

    info!("Outbox forwarder stopped");

    Ok(())
}
