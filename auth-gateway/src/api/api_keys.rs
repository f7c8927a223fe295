//! # API-Key Management Handlers
//!
//! `/api/v1/keys` (first-party keys) and `/api/v1/projects` (stored
//! third-party credentials). Every endpoint here is protected by the
//! caller resolver - a session JWT or an API key both work, by design.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{Duration as ChronoDuration, Utc};
use shared::errors::ApiError;
use shared::validation;
use uuid::Uuid;

use crate::api::dto::{
    ApiKeyDto, CreateApiKeyRequest, CreateProjectRequest, CreatedApiKeyDto, MessageResponse,
    ProjectDto, RevealedKeyDto, RotateApiKeyRequest, StoreKeyRequest, StoredKeyDto,
};
use crate::api::{client_ip, request_context};
use crate::service::rate_limiter::Endpoint;
use crate::AppState;

// =============================================================================
// FIRST-PARTY KEYS
// =============================================================================

/// `POST /api/v1/keys` - mints a key; the raw value appears only in this
/// response.
pub async fn create_key(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateApiKeyRequest>,
) -> Result<HttpResponse, ApiError> {
    state
        .rate_limiter
        .check(Endpoint::Api, &client_ip(&req))
        .await?;
    let caller = state.caller_resolver.resolve(&req).await?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    let expires_at = body
        .expires_in_days
        .map(|days| Utc::now() + ChronoDuration::days(days));

    let (raw_key, key) = state
        .api_key_service
        .create_key(
            caller.user_id,
            body.organization_id,
            &body.name,
            body.scopes,
            expires_at,
            &request_context(&req),
        )
        .await?;

    Ok(HttpResponse::Created().json(CreatedApiKeyDto {
        key: raw_key,
        meta: key.into(),
    }))
}

/// `GET /api/v1/keys` - the caller's keys, metadata only.
pub async fn list_keys(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    state
        .rate_limiter
        .check(Endpoint::Api, &client_ip(&req))
        .await?;
    let caller = state.caller_resolver.resolve(&req).await?;

    let keys = state.api_key_service.list_keys(caller.user_id).await?;
    let dtos: Vec<ApiKeyDto> = keys.into_iter().map(Into::into).collect();

    Ok(HttpResponse::Ok().json(dtos))
}

/// `POST /api/v1/keys/{id}/rotate` - atomic successor mint + deactivation.
pub async fn rotate_key(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<RotateApiKeyRequest>,
) -> Result<HttpResponse, ApiError> {
    state
        .rate_limiter
        .check(Endpoint::Api, &client_ip(&req))
        .await?;
    let caller = state.caller_resolver.resolve(&req).await?;

    let (raw_key, key) = state
        .api_key_service
        .rotate_key(
            caller.user_id,
            path.into_inner(),
            body.grace_seconds,
            &request_context(&req),
        )
        .await?;

    Ok(HttpResponse::Ok().json(CreatedApiKeyDto {
        key: raw_key,
        meta: key.into(),
    }))
}

/// `DELETE /api/v1/keys/{id}` - immediate revocation.
pub async fn revoke_key(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    state
        .rate_limiter
        .check(Endpoint::Api, &client_ip(&req))
        .await?;
    let caller = state.caller_resolver.resolve(&req).await?;

    state
        .api_key_service
        .revoke_key(caller.user_id, path.into_inner(), &request_context(&req))
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("API key revoked")))
}

// =============================================================================
// PROJECTS
// =============================================================================

/// `POST /api/v1/projects`.
pub async fn create_project(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateProjectRequest>,
) -> Result<HttpResponse, ApiError> {
    state
        .rate_limiter
        .check(Endpoint::Api, &client_ip(&req))
        .await?;
    let caller = state.caller_resolver.resolve(&req).await?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    let project = state
        .api_key_service
        .create_project(
            body.organization_id,
            &body.name,
            body.description.as_deref(),
            caller.user_id,
        )
        .await?;

    Ok(HttpResponse::Created().json(ProjectDto::from(project)))
}

/// `GET /api/v1/projects` - projects the caller belongs to.
pub async fn list_projects(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    state
        .rate_limiter
        .check(Endpoint::Api, &client_ip(&req))
        .await?;
    let caller = state.caller_resolver.resolve(&req).await?;

    let projects = state.api_key_service.list_projects(caller.user_id).await?;
    let dtos: Vec<ProjectDto> = projects.into_iter().map(Into::into).collect();

    Ok(HttpResponse::Ok().json(dtos))
}

/// `DELETE /api/v1/projects/{id}` - cascades to the project's stored keys.
pub async fn delete_project(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    state
        .rate_limiter
        .check(Endpoint::Api, &client_ip(&req))
        .await?;
    let caller = state.caller_resolver.resolve(&req).await?;

    state
        .api_key_service
        .delete_project(path.into_inner(), caller.user_id)
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Project deleted")))
}

// =============================================================================
// STORED KEYS
// =============================================================================

/// `POST /api/v1/projects/{id}/keys` - stores a credential encrypted.
pub async fn store_key(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<StoreKeyRequest>,
) -> Result<HttpResponse, ApiError> {
    state
        .rate_limiter
        .check(Endpoint::Api, &client_ip(&req))
        .await?;
    let caller = state.caller_resolver.resolve(&req).await?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    let record = state
        .api_key_service
        .store_key(
            path.into_inner(),
            caller.user_id,
            &body.name,
            &body.environment,
            &body.value,
            &request_context(&req),
        )
        .await?;

    Ok(HttpResponse::Created().json(StoredKeyDto::from(record)))
}

/// `GET /api/v1/projects/{id}/keys` - metadata only, no values.
pub async fn list_stored_keys(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    state
        .rate_limiter
        .check(Endpoint::Api, &client_ip(&req))
        .await?;
    let caller = state.caller_resolver.resolve(&req).await?;

    let keys = state
        .api_key_service
        .list_stored_keys(path.into_inner(), caller.user_id)
        .await?;
    let dtos: Vec<StoredKeyDto> = keys.into_iter().map(Into::into).collect();

    Ok(HttpResponse::Ok().json(dtos))
}

/// `GET /api/v1/projects/{id}/keys/{key_id}` - decrypted reveal, members
/// only.
pub async fn reveal_stored_key(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, ApiError> {
    state
        .rate_limiter
        .check(Endpoint::Api, &client_ip(&req))
        .await?;
    let caller = state.caller_resolver.resolve(&req).await?;

    let (project_id, key_id) = path.into_inner();
    let revealed = state
        .api_key_service
        .reveal_key(project_id, key_id, caller.user_id)
        .await?;

    Ok(HttpResponse::Ok().json(RevealedKeyDto {
        meta: revealed.record.into(),
        value: revealed.value,
    }))
}

/// `DELETE /api/v1/projects/{id}/keys/{key_id}`.
pub async fn delete_stored_key(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, ApiError> {
    state
        .rate_limiter
        .check(Endpoint::Api, &client_ip(&req))
        .await?;
    let caller = state.caller_resolver.resolve(&req).await?;

    let (project_id, key_id) = path.into_inner();
    state
        .api_key_service
        .delete_stored_key(project_id, key_id, caller.user_id, &request_context(&req))
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Stored key deleted")))
}
