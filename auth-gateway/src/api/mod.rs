//! # HTTP Layer
//!
//! Handlers bridge the wire to the service layer. Every handler follows the
//! same shape:
//!
//! 1. **Rate-limit** the endpoint class (sensitive endpoints)
//! 2. **Extract** and **validate** request data
//! 3. **Call** the service layer
//! 4. **Translate** the result to an HTTP response
//!
//! | Module | Endpoints |
//! |--------|-----------|
//! | [`oauth`] | `/oauth/*` and the `/api/v1/oauth/*` alias |
//! | [`web`] | `/web/login`, `/web/logout`, `/web/device` |
//! | [`api_keys`] | `/api/v1/keys`, `/api/v1/projects` |
//! | [`admin`] | `/admin/bypass-login`, `/admin/change-password`, `/admin/register-app` |
//! | [`health`] | `/health` |

pub mod admin;
pub mod api_keys;
pub mod dto;
pub mod health;
pub mod oauth;
pub mod routes;
pub mod web;

use crate::service::oauth_service::RequestContext;
use actix_web::HttpRequest;

/// Caller IP for rate limiting and audit rows.
///
/// `realip_remote_addr` honors `Forwarded`/`X-Forwarded-For` set by the
/// edge; behind no proxy it falls back to the peer address.
pub fn client_ip(req: &HttpRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Assembles the audit context from request headers.
pub fn request_context(req: &HttpRequest) -> RequestContext {
    RequestContext {
        ip_address: req
            .connection_info()
            .realip_remote_addr()
            .map(String::from),
        user_agent: req
            .headers()
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    }
}
