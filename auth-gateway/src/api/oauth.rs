//! # OAuth Endpoint Handlers
//!
//! `/oauth/authorize`, `/oauth/token`, `/oauth/revoke`,
//! `/oauth/introspect`, `/oauth/device` and the RFC 8414 metadata document.
//! The same handlers also serve the `/api/v1/oauth/*` alias - a
//! compatibility concession for clients pinned to either convention.
//!
//! ## Error Reporting Discipline
//!
//! - Rate-limit rejections are 429 with `Retry-After`, before anything else
//!   runs.
//! - Authorize errors *after* client + redirect URI validation are reported
//!   by redirect; everything earlier (and every token-endpoint error) is a
//!   JSON body in RFC 6749 shape.
//! - An unauthenticated authorize is not an error: it 302s into the login
//!   bridge with the original URL in `return_to`.

use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use shared::errors::OAuthError;
use shared::validation;
use tracing::warn;

use crate::api::dto::{
    AuthorizeQuery, DeviceAuthorizationForm, IntrospectForm, RevokeForm, TokenRequestForm,
    TokenResponseDto,
};
use crate::api::{client_ip, request_context};
use crate::service::oauth_service::{AuthorizeOutcome, AuthorizeParams, TokenParams};
use crate::service::rate_limiter::Endpoint;
use crate::service::session_service::SESSION_COOKIE;
use crate::AppState;

/// `GET /oauth/authorize` - the Authorization Code + PKCE front door.
///
/// Outcomes, all 302s: `code` to the client's redirect URI, an error report
/// to the same URI, or a bounce into `/web/login` when no session exists.
pub async fn authorize(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<AuthorizeQuery>,
) -> Result<HttpResponse, OAuthError> {
    let ip = client_ip(&req);
    if let Err(e) = state.rate_limiter.check(Endpoint::OAuthAuthorize, &ip).await {
        return Ok(e.error_response());
    }

    let query = query.into_inner();
    if let Err(e) = validation::validate_request(&query) {
        // Syntactic failure: no redirect, direct JSON report
        return Err(OAuthError::invalid_request(e.to_string()));
    }

    // Resolve the end-user from the session cookie; a missing or dead
    // cookie is "not signed in", not an error.
    let session_user = match req.cookie(SESSION_COOKIE) {
        Some(cookie) => state
            .session_service
            .resolve_session_user(cookie.value())
            .await
            .map_err(|e| {
                warn!(error = %e, "Session resolution failed");
                OAuthError::server_error()
            })?
            .map(|user| user.user_id),
        None => None,
    };

    // The full authorize URL survives the login bounce via return_to
    let original_url = format!(
        "{}{}",
        state.config.urls.auth_base_url.trim_end_matches('/'),
        req.uri()
    );

    let params = AuthorizeParams {
        client_id: query.client_id,
        response_type: query.response_type,
        redirect_uri: query.redirect_uri,
        scope: query.scope,
        state: query.state,
        code_challenge: query.code_challenge,
        code_challenge_method: query.code_challenge_method,
    };

    let outcome = state
        .oauth_service
        .authorize(params, session_user, &original_url, &request_context(&req))
        .await?;

    let location = match outcome {
        AuthorizeOutcome::Granted { redirect_url } => redirect_url,
        AuthorizeOutcome::ErrorRedirect { redirect_url } => redirect_url,
        AuthorizeOutcome::LoginRequired { login_url } => login_url,
    };

    Ok(HttpResponse::Found()
        .insert_header(("Location", location))
        .finish())
}

/// `POST /oauth/token` - all three grant families, form-encoded.
pub async fn token(
    req: HttpRequest,
    state: web::Data<AppState>,
    form: web::Form<TokenRequestForm>,
) -> Result<HttpResponse, OAuthError> {
    let ip = client_ip(&req);
    if let Err(e) = state.rate_limiter.check(Endpoint::OAuthToken, &ip).await {
        return Ok(e.error_response());
    }

    let form = form.into_inner();
    if let Err(e) = validation::validate_request(&form) {
        return Err(OAuthError::invalid_request(e.to_string()));
    }

    let params = TokenParams {
        grant_type: form.grant_type,
        client_id: form.client_id,
        client_secret: form.client_secret,
        code: form.code,
        redirect_uri: form.redirect_uri,
        code_verifier: form.code_verifier,
        refresh_token: form.refresh_token,
        device_code: form.device_code,
        scope: form.scope,
    };

    let pair = state
        .oauth_service
        .token(params, &request_context(&req))
        .await?;

    Ok(HttpResponse::Ok()
        // Token responses must never be cached (RFC 6749 §5.1)
        .insert_header(("Cache-Control", "no-store"))
        .insert_header(("Pragma", "no-cache"))
        .json(TokenResponseDto::from(pair)))
}

/// `POST /oauth/revoke` (RFC 7009). Always 200, even for unknown tokens.
pub async fn revoke(
    req: HttpRequest,
    state: web::Data<AppState>,
    form: web::Form<RevokeForm>,
) -> Result<HttpResponse, OAuthError> {
    let ip = client_ip(&req);
    if let Err(e) = state.rate_limiter.check(Endpoint::OAuthRevoke, &ip).await {
        return Ok(e.error_response());
    }

    let form = form.into_inner();
    if let Err(e) = validation::validate_request(&form) {
        return Err(OAuthError::invalid_request(e.to_string()));
    }

    state
        .oauth_service
        .revoke(
            &form.token,
            form.token_type_hint.as_deref(),
            &request_context(&req),
        )
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({})))
}

/// `POST /oauth/introspect` (RFC 7662). Requires an authenticated caller -
/// 401 otherwise; expired/revoked tokens still answer 200 with
/// `active: false`.
pub async fn introspect(
    req: HttpRequest,
    state: web::Data<AppState>,
    form: web::Form<IntrospectForm>,
) -> Result<HttpResponse, OAuthError> {
    // Introspection leaks token metadata; only authenticated callers may ask
    let caller = state.caller_resolver.resolve(&req).await;
    if let Err(e) = caller {
        return Ok(e.error_response());
    }

    let form = form.into_inner();
    if let Err(e) = validation::validate_request(&form) {
        return Err(OAuthError::invalid_request(e.to_string()));
    }

    let response = state.oauth_service.introspect(&form.token).await?;

    Ok(HttpResponse::Ok().json(response))
}

/// `POST /oauth/device` (RFC 8628 §3.1) - starts a device authorization.
pub async fn device_authorization(
    req: HttpRequest,
    state: web::Data<AppState>,
    form: web::Form<DeviceAuthorizationForm>,
) -> Result<HttpResponse, OAuthError> {
    let ip = client_ip(&req);
    if let Err(e) = state.rate_limiter.check(Endpoint::Api, &ip).await {
        return Ok(e.error_response());
    }

    let form = form.into_inner();
    if let Err(e) = validation::validate_request(&form) {
        return Err(OAuthError::invalid_request(e.to_string()));
    }

    let response = state
        .oauth_service
        .start_device_authorization(&form.client_id, form.scope.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(response))
}

/// `GET /.well-known/oauth-authorization-server` (RFC 8414).
pub async fn server_metadata(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.oauth_service.server_metadata())
}
