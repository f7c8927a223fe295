//! # Lanonasis Auth Gateway
//!
//! Centralized authentication gateway brokering identity for a family of
//! applications: browser apps, server-to-server callers, CLIs, IDE
//! extensions and MCP clients.
//!
//! ## Architecture Overview
//!
//! This service follows **Clean Architecture** with clear separation
//! between layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        HTTP Layer (api/)                        │
//! │  ┌─────────────┐  ┌──────────────────────┐  ┌───────────────┐   │
//! │  │   routes    │  │ oauth/web/keys/admin │  │     DTOs      │   │
//! │  └──────┬──────┘  └──────────┬───────────┘  └───────┬───────┘   │
//! └─────────┼────────────────────┼──────────────────────┼───────────┘
//!           ▼                    ▼                      ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Service Layer (service/)                     │
//! │   OAuthService · SessionService · ApiKeyService · AdminService  │
//! │   RateLimiter · IdentityProvider · Encryptor                    │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Repository Layer (repository/)                 │
//! │   clients · codes · tokens · devices · keys · users · events    │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Domain Layer (domain/)                       │
//! │   Entities · Domain Events · Scope filtering · PKCE             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Endpoint Families
//!
//! | Family | Endpoints |
//! |--------|-----------|
//! | OAuth engine | `/oauth/*` (+ `/api/v1/oauth/*` alias), `/.well-known/oauth-authorization-server` |
//! | Login bridge | `/web/login`, `/web/logout`, `/web/device` |
//! | Key management | `/api/v1/keys/*`, `/api/v1/projects/*` |
//! | Admin bypass | `/admin/*` |
//! | Health | `/health` |
//!
//! ## Companion Process
//!
//! The `outbox-forwarder` binary (same workspace) drains the event outbox
//! into the read-side store. This process never reads from the read side.
//!
//! ## Graceful Shutdown
//!
//! Actix-web handles SIGTERM/SIGINT: stops accepting new connections,
//! drains in-flight requests, then the pools close on drop.

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use shared::{
    auth::{jwt::JwtService, middleware::CallerResolver},
    config::GatewayConfig,
    database,
    redis_client::RedisClient,
    tracing_config,
};
use std::sync::Arc;
use tracing::info;

mod api;
mod domain;
mod repository;
mod service;

use api::routes;
use repository::{
    ApiKeyRepository, ClientRepository, CodeRepository, DeviceRepository, EventRepository,
    TokenRepository, UserRepository,
};
use service::encryptor::AesGcmEncryptor;
use service::identity_provider::HttpIdentityProvider;
use service::{AdminService, ApiKeyService, OAuthService, RateLimiter, SessionService};

/// Shared application state injected into all request handlers.
///
/// Wrapped in [`actix_web::web::Data`]; every field is cheap to clone or
/// internally `Arc`-based.
pub struct AppState {
    /// Immutable configuration built at startup
    pub config: GatewayConfig,
    /// OAuth protocol engine
    pub oauth_service: OAuthService,
    /// Login bridge (cookies, sessions, registry upsert)
    pub session_service: SessionService,
    /// First-party + stored API keys
    pub api_key_service: Arc<ApiKeyService>,
    /// Out-of-band admin path
    pub admin_service: AdminService,
    /// Bearer-JWT-then-API-key caller resolution
    pub caller_resolver: CallerResolver,
    /// Redis-backed per-endpoint quotas
    pub rate_limiter: RateLimiter,
    /// Outbox depth for the health surface
    pub event_repository: EventRepository,
    /// Redis handle for the health surface
    pub redis: RedisClient,
}

/// Application entry point.
///
/// # Initialization Sequence
///
/// 1. Load and **validate** configuration - refuse to start on any missing
///    or malformed required option
/// 2. Initialize structured logging
/// 3. Connect the primary database pool and Redis
/// 4. Wire repositories and services (dependency injection)
/// 5. Bind and serve
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // ─────────────────────────────────────────────────────────────────────
    // Step 1: Configuration (fail fast, before any socket exists)
    // ─────────────────────────────────────────────────────────────────────
    let config = GatewayConfig::from_env().expect("Failed to load configuration");
    config
        .validate()
        .expect("Configuration rejected; refusing to start");

    // ─────────────────────────────────────────────────────────────────────
    // Step 2: Structured logging
    // ─────────────────────────────────────────────────────────────────────
    tracing_config::init_tracing(
        &config.service_name,
        config.json_logs(),
        config.log_level.as_deref(),
    );

    info!(
        service = %config.service_name,
        host = %config.server.host,
        port = %config.server.port,
        "Starting auth-gateway"
    );

    // ─────────────────────────────────────────────────────────────────────
    // Step 3: Infrastructure connections
    // ─────────────────────────────────────────────────────────────────────
    let db_pool = database::create_pool(&config.database)
        .await
        .expect("Failed to create database pool");

    let redis_client = RedisClient::new(&config.redis)
        .await
        .expect("Failed to connect to Redis");

    // ─────────────────────────────────────────────────────────────────────
    // Step 4: Repositories and services
    // ─────────────────────────────────────────────────────────────────────
    let jwt_service = Arc::new(JwtService::new(
        &config.jwt.secret,
        config.jwt.session_ttl_seconds,
    ));
    let identity_provider = Arc::new(
        HttpIdentityProvider::new(&config.identity)
            .expect("Failed to build identity provider client"),
    );
    let encryptor = Arc::new(
        AesGcmEncryptor::from_base64_key(&config.keys.encryption_key)
            .expect("Failed to initialize stored-key encryption"),
    );

    let client_repository = ClientRepository::new(db_pool.clone(), redis_client.clone());
    let code_repository = CodeRepository::new(db_pool.clone(), redis_client.clone());
    let token_repository = TokenRepository::new(db_pool.clone());
    let device_repository = DeviceRepository::new(db_pool.clone());
    let user_repository = UserRepository::new(db_pool.clone());
    let api_key_repository = ApiKeyRepository::new(db_pool.clone());
    let event_repository = EventRepository::new(db_pool.clone());

    let oauth_service = OAuthService::new(
        db_pool.clone(),
        client_repository.clone(),
        code_repository,
        token_repository,
        device_repository,
        config.oauth.clone(),
        config.urls.auth_base_url.clone(),
    );

    let session_service = SessionService::new(
        db_pool.clone(),
        user_repository.clone(),
        jwt_service.clone(),
        identity_provider,
        redis_client.clone(),
        config.urls.dashboard_url.clone(),
        config.urls.cookie_domain.clone(),
    );

    let api_key_service = Arc::new(ApiKeyService::new(
        db_pool.clone(),
        api_key_repository,
        user_repository.clone(),
        encryptor,
        config.keys.prefix.clone(),
    ));

    let admin_service = AdminService::new(
        db_pool.clone(),
        user_repository,
        client_repository,
        jwt_service.clone(),
        redis_client.clone(),
    );

    let caller_resolver = CallerResolver::new(jwt_service, api_key_service.clone());

    let rate_limiter = RateLimiter::new(
        redis_client.clone(),
        config.rate_limit.window_ms,
        config.rate_limit.max_requests,
    );

    let cors_origin = config.cors_origin.clone();
    let server_host = config.server.host.clone();
    let server_port = config.server.port;
    let workers = config.server.workers;

    let app_state = web::Data::new(AppState {
        config,
        oauth_service,
        session_service,
        api_key_service,
        admin_service,
        caller_resolver,
        rate_limiter,
        event_repository,
        redis: redis_client,
    });

    // Pool is also shared directly for health checks
    let db_pool = web::Data::new(db_pool);

    // ─────────────────────────────────────────────────────────────────────
    // Step 5: HTTP server
    // ─────────────────────────────────────────────────────────────────────
    info!("Server listening on {}:{}", server_host, server_port);

    let mut server = HttpServer::new(move || {
        let cors = if cors_origin == "*" {
            Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600)
        } else {
            Cors::default()
                .allowed_origin(&cors_origin)
                .allow_any_method()
                .allow_any_header()
                .supports_credentials()
                .max_age(3600)
        };

        App::new()
            // Middleware stack (first added = last executed)
            .wrap(cors)
            .wrap(middleware::Compress::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            // Shared state
            .app_data(app_state.clone())
            .app_data(db_pool.clone())
            // Routes
            .configure(routes::configure)
    })
    .bind((server_host, server_port))?;

    if workers > 0 {
        server = server.workers(workers);
    }

    server.run().await
}
