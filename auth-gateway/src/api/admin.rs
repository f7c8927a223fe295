//! # Admin Bypass Handlers
//!
//! `/admin/bypass-login`, `/admin/change-password`, `/admin/register-app`.
//! This surface authenticates against the admin tables only, so it stays
//! usable when the identity provider is down.

use actix_web::{web, HttpRequest, HttpResponse};
use shared::errors::ApiError;
use shared::validation;

use crate::api::dto::{
    AdminLoginRequest, AdminLoginResponse, ChangePasswordRequest, MessageResponse,
    RegisterAppRequest, RegisteredAppResponse,
};
use crate::api::{client_ip, request_context};
use crate::domain::entities::AdminSession;
use crate::service::admin_service::RegisterAppParams;
use crate::service::rate_limiter::Endpoint;
use crate::AppState;

/// `POST /admin/bypass-login`.
pub async fn bypass_login(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<AdminLoginRequest>,
) -> Result<HttpResponse, ApiError> {
    state
        .rate_limiter
        .check(Endpoint::AdminBypass, &client_ip(&req))
        .await?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    let result = state
        .admin_service
        .bypass_login(&body.email, &body.password, &request_context(&req))
        .await?;

    Ok(HttpResponse::Ok().json(AdminLoginResponse {
        token: result.token,
        admin_id: result.admin_id,
        email: result.email,
    }))
}

/// `POST /admin/change-password` - requires the admin bearer.
pub async fn change_password(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<ChangePasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let session = require_admin(&req, &state).await?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    state
        .admin_service
        .change_password(&session, &body.new_password, &request_context(&req))
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Password changed")))
}

/// `POST /admin/register-app` - registers an OAuth client; confidential
/// clients get their one-shot secret in this response.
pub async fn register_app(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<RegisterAppRequest>,
) -> Result<HttpResponse, ApiError> {
    let session = require_admin(&req, &state).await?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    if !matches!(body.client_type.as_str(), "public" | "confidential") {
        return Err(ApiError::BadRequest {
            message: "client_type must be 'public' or 'confidential'".to_string(),
        });
    }
    if !matches!(
        body.application_type.as_str(),
        "web" | "native" | "cli" | "mcp" | "server"
    ) {
        return Err(ApiError::BadRequest {
            message: "application_type must be one of web, native, cli, mcp, server".to_string(),
        });
    }

    let registered = state
        .admin_service
        .register_app(
            RegisterAppParams {
                client_id: body.client_id,
                client_type: body.client_type,
                application_type: body.application_type,
                require_pkce: body.require_pkce,
                allowed_code_challenge_methods: body.allowed_code_challenge_methods,
                allowed_redirect_uris: body.allowed_redirect_uris,
                allowed_scopes: body.allowed_scopes,
                default_scopes: body.default_scopes,
            },
            &session,
            &request_context(&req),
        )
        .await?;

    Ok(HttpResponse::Created().json(RegisteredAppResponse {
        client_id: registered.client.client_id,
        client_type: registered.client.client_type,
        application_type: registered.client.application_type,
        client_secret: registered.client_secret,
    }))
}

/// Extracts and authenticates the admin bearer token.
async fn require_admin(
    req: &HttpRequest,
    state: &web::Data<AppState>,
) -> Result<AdminSession, ApiError> {
    let bearer = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::MissingAuth)?;

    state.admin_service.authenticate_admin(bearer).await
}
