//! # Route Configuration
//!
//! ## Route Structure
//!
//! ```text
//! /
//! ├── health                                  GET    → health_check
//! ├── .well-known/oauth-authorization-server  GET    → server_metadata
//! │
//! ├── oauth/                                  (also mounted at /api/v1/oauth)
//! │   ├── authorize                           GET    → authorize
//! │   ├── token                               POST   → token
//! │   ├── revoke                              POST   → revoke
//! │   ├── introspect                          POST   → introspect
//! │   └── device                              POST   → device_authorization
//! │
//! ├── web/
//! │   ├── login                               GET    → login_form
//! │   ├── login                               POST   → login
//! │   ├── logout                              GET    → logout
//! │   ├── device                              GET    → device_form
//! │   └── device                              POST   → device_decide
//! │
//! ├── api/v1/
//! │   ├── keys                                POST/GET, {id}/rotate POST, {id} DELETE
//! │   └── projects                            POST/GET, {id} DELETE,
//! │                                           {id}/keys POST/GET,
//! │                                           {id}/keys/{key_id} GET/DELETE
//! │
//! └── admin/
//!     ├── bypass-login                        POST   → bypass_login
//!     ├── change-password                     POST   → change_password
//!     └── register-app                        POST   → register_app
//! ```
//!
//! ## The Double Mount
//!
//! `/oauth/*` and `/api/v1/oauth/*` are served by the same handlers: some
//! clients were built against the root mount, others against the versioned
//! one, and both are first-class.

use actix_web::{web, HttpResponse, Scope};
use shared::errors::ApiError;

use super::{admin, api_keys, health, oauth, web as web_handlers};

/// Builds one OAuth scope; mounted twice (root + versioned alias).
fn oauth_scope(path: &str) -> Scope {
    web::scope(path)
        .route("/authorize", web::get().to(oauth::authorize))
        .route("/token", web::post().to(oauth::token))
        .route("/revoke", web::post().to(oauth::revoke))
        .route("/introspect", web::post().to(oauth::introspect))
        .route("/device", web::post().to(oauth::device_authorization))
}

/// Configures all routes for the gateway.
///
/// Called from `main.rs` during app initialization:
///
/// ```rust,ignore
/// App::new().configure(routes::configure)
/// ```
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // ─────────────────────────────────────────────────────────────────
        // Health & server metadata
        // ─────────────────────────────────────────────────────────────────
        .route("/health", web::get().to(health::health_check))
        .route(
            "/.well-known/oauth-authorization-server",
            web::get().to(oauth::server_metadata),
        )
        // ─────────────────────────────────────────────────────────────────
        // OAuth protocol engine (root mount + versioned alias)
        // ─────────────────────────────────────────────────────────────────
        .service(oauth_scope("/oauth"))
        .service(oauth_scope("/api/v1/oauth"))
        // ─────────────────────────────────────────────────────────────────
        // Web login bridge + device verification
        // ─────────────────────────────────────────────────────────────────
        .service(
            web::scope("/web")
                .route("/login", web::get().to(web_handlers::login_form))
                .route("/login", web::post().to(web_handlers::login))
                .route("/logout", web::get().to(web_handlers::logout))
                .route("/device", web::get().to(web_handlers::device_form))
                .route("/device", web::post().to(web_handlers::device_decide)),
        )
        // ─────────────────────────────────────────────────────────────────
        // Key management (protected: session JWT or API key)
        // ─────────────────────────────────────────────────────────────────
        .service(
            web::scope("/api/v1/keys")
                .route("", web::post().to(api_keys::create_key))
                .route("", web::get().to(api_keys::list_keys))
                .route("/{id}/rotate", web::post().to(api_keys::rotate_key))
                .route("/{id}", web::delete().to(api_keys::revoke_key)),
        )
        .service(
            web::scope("/api/v1/projects")
                .route("", web::post().to(api_keys::create_project))
                .route("", web::get().to(api_keys::list_projects))
                .route("/{id}", web::delete().to(api_keys::delete_project))
                .route("/{id}/keys", web::post().to(api_keys::store_key))
                .route("/{id}/keys", web::get().to(api_keys::list_stored_keys))
                .route(
                    "/{id}/keys/{key_id}",
                    web::get().to(api_keys::reveal_stored_key),
                )
                .route(
                    "/{id}/keys/{key_id}",
                    web::delete().to(api_keys::delete_stored_key),
                ),
        )
        // ─────────────────────────────────────────────────────────────────
        // Admin bypass (out-of-band)
        // ─────────────────────────────────────────────────────────────────
        .service(
            web::scope("/admin")
                .route("/bypass-login", web::post().to(admin::bypass_login))
                .route("/change-password", web::post().to(admin::change_password))
                .route("/register-app", web::post().to(admin::register_app)),
        )
        // ─────────────────────────────────────────────────────────────────
        // Unknown routes: 404 with a machine code, not actix's default
        // ─────────────────────────────────────────────────────────────────
        .default_service(web::route().to(not_found));
}

/// 404 handler with the standard error body.
async fn not_found(req: actix_web::HttpRequest) -> HttpResponse {
    use actix_web::ResponseError;
    ApiError::NotFound {
        resource: format!("route:{}", req.path()),
    }
    .error_response()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_scope_builds_for_both_mounts() {
        // Both mounts must construct without panicking; route behavior is
        // covered by handler tests.
        let _root = oauth_scope("/oauth");
        let _versioned = oauth_scope("/api/v1/oauth");
    }
}
