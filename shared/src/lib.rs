//! # Lanonasis Auth Gateway - Shared Library
//!
//! Core shared functionality for the auth gateway and its outbox forwarder.
//!
//! This crate provides the cross-cutting utilities, types, and services used
//! by both workspace binaries. It follows the DRY principle to avoid code
//! duplication and ensure consistency.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Workspace Binaries                      │
//! │      ┌──────────────┐          ┌──────────────────┐         │
//! │      │ auth-gateway │          │ outbox-forwarder │         │
//! │      └──────┬───────┘          └────────┬─────────┘         │
//! │             │                           │                   │
//! │             └───────────┬───────────────┘                   │
//! │                         │                                   │
//! │                ┌────────▼────────┐                          │
//! │                │  shared crate   │ ◄── You are here         │
//! │                └─────────────────┘                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose | Key Types |
//! |--------|---------|-----------|
//! | [`config`] | Environment-based configuration | [`GatewayConfig`] |
//! | [`errors`] | Standardized error handling | [`ApiError`], [`OAuthError`] |
//! | [`auth`] | Session JWTs, credential hashing, caller resolution | `JwtService`, `PasswordHasher`, `CallerResolver` |
//! | [`database`] | PostgreSQL connection pools | `create_pool`, `create_readside_pool` |
//! | [`redis_client`] | Redis for cache, rate limits & lockout counters | `RedisClient` |
//! | [`tracing_config`] | Structured logging setup | `init_tracing` |
//! | [`validation`] | Request validation helpers | Custom validators |
//!
//! ## Design Decisions
//!
//! 1. **Single source of truth**: All shared types live here to prevent drift
//! 2. **Security first**: Credential material is hashed before it touches a row
//! 3. **Observable by default**: Structured logging and tracing built-in
//! 4. **Fail fast**: Configuration is validated before a socket is bound

pub mod auth;
pub mod config;
pub mod database;
pub mod errors;
pub mod redis_client;
pub mod tracing_config;
pub mod validation;

// Re-exports for convenience - import commonly used types directly from `shared`
pub use config::GatewayConfig;
pub use errors::{ApiError, ApiResult, OAuthError, OAuthErrorKind};
