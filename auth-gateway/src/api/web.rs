//! # Web Login Bridge Handlers
//!
//! The browser-facing endpoints that make `/oauth/authorize` work without
//! breaking non-browser flows: an unauthenticated authorize 302s into
//! `GET /web/login` with `return_to`, the user signs in, and the bridge
//! sends them back to the original authorize URL with cookies set.
//!
//! Also hosts the device-flow verification page (`/web/device`) where the
//! user enters the short code shown by their CLI/IDE and approves or
//! denies the authorization.
//!
//! The HTML here is deliberately minimal - real deployments put branded
//! pages in front; the contract is the form fields and the cookies.

use actix_web::cookie::time::Duration as CookieDuration;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use shared::errors::ApiError;
use shared::validation;

use crate::api::dto::{
    DeviceDecisionForm, DeviceVerifyQuery, MessageResponse, ReturnToQuery, WebLoginForm,
};
use crate::api::{client_ip, request_context};
use crate::service::rate_limiter::Endpoint;
use crate::service::session_service::{SESSION_COOKIE, USER_COOKIE};
use crate::AppState;

// =============================================================================
// COOKIE ASSEMBLY
// =============================================================================

/// Builds the HTTP-only session cookie (`lanonasis_session`).
///
/// Attributes are a compatibility contract: HttpOnly, Secure in
/// production, SameSite=Lax, scoped to the configured parent domain,
/// path `/`, 7-day max-age.
fn session_cookie<'a>(state: &AppState, token: String) -> Cookie<'a> {
    Cookie::build(SESSION_COOKIE, token)
        .domain(state.config.urls.cookie_domain.clone())
        .path("/")
        .http_only(true)
        .secure(state.config.is_production())
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(
            state.config.jwt.session_ttl_seconds as i64,
        ))
        .finish()
}

/// Builds the script-readable companion cookie (`lanonasis_user`) carrying
/// `{id, email, role}` for UI convenience. Same lifetime, not HttpOnly,
/// never trusted server-side.
fn user_cookie<'a>(
    state: &AppState,
    user_id: uuid::Uuid,
    email: &str,
    role: &str,
) -> Cookie<'a> {
    let payload = serde_json::json!({
        "id": user_id,
        "email": email,
        "role": role,
    })
    .to_string();

    // Cookie-safe encoding of the JSON payload
    let encoded: String = url::form_urlencoded::byte_serialize(payload.as_bytes()).collect();

    Cookie::build(USER_COOKIE, encoded)
        .domain(state.config.urls.cookie_domain.clone())
        .path("/")
        .secure(state.config.is_production())
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(
            state.config.jwt.session_ttl_seconds as i64,
        ))
        .finish()
}

/// An expired copy of a cookie, for logout.
fn clearing_cookie<'a>(state: &AppState, name: &'a str) -> Cookie<'a> {
    Cookie::build(name, "")
        .domain(state.config.urls.cookie_domain.clone())
        .path("/")
        .max_age(CookieDuration::ZERO)
        .finish()
}

// =============================================================================
// LOGIN
// =============================================================================

/// `GET /web/login` - renders the login form, preserving `return_to`.
pub async fn login_form(query: web::Query<ReturnToQuery>) -> HttpResponse {
    let return_to = query
        .return_to
        .as_deref()
        .map(|v| html_escape(v))
        .unwrap_or_default();

    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Sign in</title></head>
<body>
  <h1>Sign in</h1>
  <form method="post" action="/web/login">
    <input type="hidden" name="return_to" value="{return_to}">
    <label>Email <input type="email" name="email" required></label>
    <label>Password <input type="password" name="password" required></label>
    <button type="submit">Sign in</button>
  </form>
</body>
</html>"#
    );

    HttpResponse::Ok().content_type("text/html; charset=utf-8").body(body)
}

/// `POST /web/login` - verifies credentials, sets both cookies, redirects
/// to the sanitized `return_to` (or the dashboard).
pub async fn login(
    req: HttpRequest,
    state: web::Data<AppState>,
    form: web::Form<WebLoginForm>,
) -> Result<HttpResponse, ApiError> {
    let ip = client_ip(&req);
    state.rate_limiter.check(Endpoint::WebLogin, &ip).await?;

    let form = form.into_inner();
    validation::validate_request(&form)?;

    let result = state
        .session_service
        .login(&form.email, &form.password, "web", &request_context(&req))
        .await?;

    tracing::debug!(
        user_id = %result.user.user_id,
        session_id = %result.session.id,
        "Login succeeded; issuing cookies"
    );

    let destination = state
        .session_service
        .sanitize_return_to(form.return_to.as_deref());

    Ok(HttpResponse::Found()
        .insert_header(("Location", destination))
        .cookie(session_cookie(&state, result.session_token.clone()))
        .cookie(user_cookie(
            &state,
            result.user.user_id,
            &result.user.email,
            &result.user.role,
        ))
        .finish())
}

/// `GET /web/logout` - revokes the session record and clears both cookies.
///
/// Revocation is server-side: any copy of the old cookie is dead on its
/// next presentation, not just in this browser.
pub async fn logout(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    if let Some(cookie) = req.cookie(SESSION_COOKIE) {
        if let Some(user) = state
            .session_service
            .resolve_session_user(cookie.value())
            .await?
        {
            state
                .session_service
                .logout(user.user_id, &request_context(&req))
                .await?;
        }
    }

    Ok(HttpResponse::Found()
        .insert_header(("Location", "/web/login".to_string()))
        .cookie(clearing_cookie(&state, SESSION_COOKIE))
        .cookie(clearing_cookie(&state, USER_COOKIE))
        .finish())
}

// =============================================================================
// DEVICE VERIFICATION
// =============================================================================

/// `GET /web/device` - the verification page where the user enters the
/// short code shown on their constrained device.
pub async fn device_form(query: web::Query<DeviceVerifyQuery>) -> HttpResponse {
    let user_code = query
        .user_code
        .as_deref()
        .map(|v| html_escape(v))
        .unwrap_or_default();

    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Device authorization</title></head>
<body>
  <h1>Authorize device</h1>
  <form method="post" action="/web/device">
    <label>Code <input type="text" name="user_code" value="{user_code}" required></label>
    <button type="submit" name="action" value="approve">Approve</button>
    <button type="submit" name="action" value="deny">Deny</button>
  </form>
</body>
</html>"#
    );

    HttpResponse::Ok().content_type("text/html; charset=utf-8").body(body)
}

/// `POST /web/device` - the signed-in user's approve/deny decision.
///
/// Polling never advances device-flow state; this is the only transition
/// out of `pending` besides expiry.
pub async fn device_decide(
    req: HttpRequest,
    state: web::Data<AppState>,
    form: web::Form<DeviceDecisionForm>,
) -> Result<HttpResponse, ApiError> {
    let form = form.into_inner();
    validation::validate_request(&form)?;

    // Approval needs a signed-in user; bounce through login and back
    let user = match req.cookie(SESSION_COOKIE) {
        Some(cookie) => {
            state
                .session_service
                .resolve_session_user(cookie.value())
                .await?
        }
        None => None,
    };

    let Some(user) = user else {
        let return_to = format!(
            "/web/device?user_code={}",
            url::form_urlencoded::byte_serialize(form.user_code.as_bytes()).collect::<String>()
        );
        return Ok(HttpResponse::Found()
            .insert_header((
                "Location",
                format!(
                    "/web/login?return_to={}",
                    url::form_urlencoded::byte_serialize(return_to.as_bytes())
                        .collect::<String>()
                ),
            ))
            .finish());
    };

    let approve = form.action == "approve";

    tracing::info!(
        user = %user.email,
        user_code = %form.user_code,
        approve,
        "Device decision submitted"
    );

    state
        .oauth_service
        .decide_device_authorization(
            &form.user_code,
            user.user_id,
            approve,
            &request_context(&req),
        )
        .await?;

    let message = if approve {
        "Device authorized. You can return to your device."
    } else {
        "Device authorization denied."
    };

    Ok(HttpResponse::Ok().json(MessageResponse::new(message)))
}

// =============================================================================
// HELPERS
// =============================================================================

/// Minimal HTML attribute escaping for values echoed into the forms.
fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape_neutralizes_markup() {
        assert_eq!(
            html_escape(r#""><script>alert(1)</script>"#),
            "&quot;&gt;&lt;script&gt;alert(1)&lt;/script&gt;"
        );
        assert_eq!(html_escape("plain-value"), "plain-value");
    }
}
