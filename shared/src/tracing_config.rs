//! # Tracing and Structured Logging Configuration
//!
//! Initializes the logging system with environment-appropriate settings.
//!
//! ## Output Formats
//!
//! | Environment | Format | Purpose |
//! |-------------|--------|---------|
//! | Development | Pretty | Human-readable, colored output |
//! | Production | JSON | Machine-parseable for log aggregation |
//!
//! ## Filter Configuration
//!
//! Control verbosity via the `RUST_LOG` environment variable:
//!
//! ```bash
//! # Info for most, debug for our crates
//! RUST_LOG=info,auth_gateway=debug,outbox_forwarder=debug
//!
//! # Silence noisy dependencies
//! RUST_LOG=info,hyper=warn,sqlx=warn
//! ```
//!
//! ## Rules
//!
//! - Structured fields: `info!(user_id = %id, "Action")`, never interpolation
//! - Never log raw tokens, codes, API keys, passwords, or cookie values -
//!   log hashes or ids instead
//! - INFO for business events, WARN for recoverable issues, ERROR for 5xx

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initializes the tracing/logging system.
///
/// Call **once** at the very start of each binary, before any code that
/// might emit logs.
///
/// # Parameters
///
/// - `service_name`: identifies the process in aggregated logs
/// - `json_output`: JSON format when true, pretty output otherwise
/// - `default_filter`: filter used when `RUST_LOG` is unset (the
///   `log_level` config option); falling back to built-in defaults
pub fn init_tracing(service_name: &str, json_output: bool, default_filter: Option<&str>) {
    // RUST_LOG wins, then the configured level, then defaults
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match default_filter {
            Some(level) => EnvFilter::new(level),
            None if json_output => EnvFilter::new("info"),
            // Development: debug level, but silence noisy crates
            None => EnvFilter::new("debug,hyper=info,sqlx=warn,reqwest=info"),
        },
    };

    if json_output {
        // JSON structured output for log aggregation tools
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(true)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true)
                    .with_current_span(true),
            )
            .init();
    } else {
        // Pretty, human-readable output for terminals
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    }

    tracing::info!(
        service = service_name,
        json = json_output,
        "Tracing initialized"
    );
}
