//! # API-Key Subsystem
//!
//! Two credential shapes, one service:
//!
//! - **First-party keys** identify a user of this system. The raw key is
//!   returned exactly once at creation; only a SHA-256 digest is stored and
//!   validation compares digests in constant time.
//! - **Stored third-party keys** are the user's own credentials held for
//!   later programmatic use, encrypted at rest by the injected
//!   [`Encryptor`], scoped by project with member access control.
//!
//! Every mutation appends an `ApiKey*`/`StoredKey*` event in the same
//! transaction where the mutation itself is transactional, so the read side
//! eventually mirrors the active-key set.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use async_trait::async_trait;
use shared::auth::middleware::{ApiKeyVerifier, VerifiedApiKey};
use shared::auth::tokens::{constant_time_eq, generate_api_key, sha256_hex};
use shared::errors::ApiError;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::entities::{ApiKey, Project, StoredApiKey};
use crate::domain::events::NewEvent;
use crate::repository::api_key_repository::{NewApiKey, NewStoredKey};
use crate::repository::{ApiKeyRepository, EventRepository, UserRepository};
use crate::service::encryptor::Encryptor;
use crate::service::oauth_service::RequestContext;

/// A stored key with its decrypted value, for authorized reveal responses.
#[derive(Debug, Clone)]
pub struct RevealedKey {
    pub record: StoredApiKey,
    pub value: String,
}

/// The API-key subsystem service.
#[derive(Clone)]
pub struct ApiKeyService {
    pool: PgPool,
    keys: ApiKeyRepository,
    users: UserRepository,
    encryptor: Arc<dyn Encryptor>,
    /// Display prefix for minted keys (e.g. `lano_live_`)
    prefix: String,
}

impl ApiKeyService {
    pub fn new(
        pool: PgPool,
        keys: ApiKeyRepository,
        users: UserRepository,
        encryptor: Arc<dyn Encryptor>,
        prefix: String,
    ) -> Self {
        Self {
            pool,
            keys,
            users,
            encryptor,
            prefix,
        }
    }

    // =========================================================================
    // FIRST-PARTY KEYS
    // =========================================================================

    /// Mints a new key. The returned raw value appears nowhere else, ever.
    pub async fn create_key(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
        name: &str,
        scopes: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
        ctx: &RequestContext,
    ) -> Result<(String, ApiKey), ApiError> {
        let raw_key = generate_api_key(&self.prefix);

        let mut tx = self.pool.begin().await?;

        let key = ApiKeyRepository::insert_key(
            &mut tx,
            NewApiKey {
                key_lookup: sha256_hex(&raw_key),
                prefix: self.prefix.clone(),
                user_id,
                organization_id,
                name: name.to_string(),
                scopes,
                expires_at,
            },
        )
        .await?;

        EventRepository::append_with_outbox(
            &mut tx,
            NewEvent::api_key_created(key.id, user_id, &key.name, &key.prefix)
                .with_request_meta(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
        )
        .await?;

        tx.commit().await?;

        info!(key_id = %key.id, user_id = %user_id, "API key created");

        Ok((raw_key, key))
    }

    /// Rotates a key: mints a successor, deactivates the old one atomically.
    ///
    /// `grace_seconds` keeps the old key validating for a handover window;
    /// `None` cuts it off immediately.
    pub async fn rotate_key(
        &self,
        user_id: Uuid,
        key_id: Uuid,
        grace_seconds: Option<i64>,
        ctx: &RequestContext,
    ) -> Result<(String, ApiKey), ApiError> {
        let old_key = self
            .keys
            .find_by_id_for_user(key_id, user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("api_key:{}", key_id),
            })?;

        if !old_key.is_active {
            return Err(ApiError::BadRequest {
                message: "Key is already inactive".to_string(),
            });
        }

        let raw_key = generate_api_key(&self.prefix);
        let grace_until = grace_seconds.map(|s| Utc::now() + ChronoDuration::seconds(s));

        let mut tx = self.pool.begin().await?;

        let new_key = ApiKeyRepository::insert_key(
            &mut tx,
            NewApiKey {
                key_lookup: sha256_hex(&raw_key),
                prefix: self.prefix.clone(),
                user_id,
                organization_id: old_key.organization_id,
                name: old_key.name.clone(),
                scopes: old_key.scopes.clone(),
                expires_at: old_key.expires_at,
            },
        )
        .await?;

        ApiKeyRepository::mark_rotated(&mut tx, old_key.id, new_key.id, grace_until).await?;

        EventRepository::append_with_outbox(
            &mut tx,
            NewEvent::api_key_rotated(old_key.id, new_key.id, user_id)
                .with_request_meta(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
        )
        .await?;
        EventRepository::append_with_outbox(
            &mut tx,
            NewEvent::api_key_created(new_key.id, user_id, &new_key.name, &new_key.prefix),
        )
        .await?;

        tx.commit().await?;

        info!(old_key = %old_key.id, new_key = %new_key.id, "API key rotated");

        Ok((raw_key, new_key))
    }

    /// Revokes a key immediately (no grace).
    pub async fn revoke_key(
        &self,
        user_id: Uuid,
        key_id: Uuid,
        ctx: &RequestContext,
    ) -> Result<(), ApiError> {
        let key = self
            .keys
            .find_by_id_for_user(key_id, user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("api_key:{}", key_id),
            })?;

        let mut tx = self.pool.begin().await?;

        ApiKeyRepository::revoke(&mut tx, key.id).await?;

        EventRepository::append_with_outbox(
            &mut tx,
            NewEvent::api_key_revoked(key.id, user_id)
                .with_request_meta(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
        )
        .await?;

        tx.commit().await?;

        info!(key_id = %key.id, user_id = %user_id, "API key revoked");

        Ok(())
    }

    /// Lists the caller's keys (prefix + metadata only; no secret material
    /// exists to return).
    pub async fn list_keys(&self, user_id: Uuid) -> Result<Vec<ApiKey>, ApiError> {
        self.keys.list_for_user(user_id).await
    }

    // =========================================================================
    // PROJECTS & STORED KEYS
    // =========================================================================

    pub async fn create_project(
        &self,
        organization_id: Uuid,
        name: &str,
        description: Option<&str>,
        created_by: Uuid,
    ) -> Result<Project, ApiError> {
        let project = self
            .keys
            .create_project(organization_id, name, description, created_by)
            .await?;

        info!(project_id = %project.id, "Project created");

        Ok(project)
    }

    pub async fn list_projects(&self, user_id: Uuid) -> Result<Vec<Project>, ApiError> {
        self.keys.list_projects_for_user(user_id).await
    }

    /// Deletes a project; its stored keys cascade away with it.
    pub async fn delete_project(&self, project_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
        self.require_member(project_id, user_id).await?;

        let deleted = self.keys.delete_project(project_id).await?;
        if deleted == 0 {
            return Err(ApiError::NotFound {
                resource: format!("project:{}", project_id),
            });
        }

        info!(project_id = %project_id, "Project deleted");

        Ok(())
    }

    /// Stores an encrypted third-party credential in a project.
    pub async fn store_key(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        name: &str,
        environment: &str,
        value: &str,
        ctx: &RequestContext,
    ) -> Result<StoredApiKey, ApiError> {
        self.require_member(project_id, user_id).await?;

        let encrypted_value = self.encryptor.encrypt(value)?;

        let record = self
            .keys
            .insert_stored_key(NewStoredKey {
                project_id,
                name: name.to_string(),
                environment: environment.to_string(),
                encrypted_value,
                created_by: user_id,
            })
            .await?;

        self.append_stored_key_event(
            NewEvent::stored_key_saved(record.id, project_id, name, environment)
                .with_request_meta(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
        )
        .await;

        info!(key_id = %record.id, project_id = %project_id, "Stored key saved");

        Ok(record)
    }

    /// Returns a stored credential decrypted - members only.
    pub async fn reveal_key(
        &self,
        project_id: Uuid,
        key_id: Uuid,
        user_id: Uuid,
    ) -> Result<RevealedKey, ApiError> {
        self.require_member(project_id, user_id).await?;

        let record = self
            .keys
            .find_stored_key(project_id, key_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("stored_key:{}", key_id),
            })?;

        let value = self.encryptor.decrypt(&record.encrypted_value)?;

        Ok(RevealedKey { record, value })
    }

    /// Lists stored keys (metadata only, no values).
    pub async fn list_stored_keys(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<StoredApiKey>, ApiError> {
        self.require_member(project_id, user_id).await?;
        self.keys.list_stored_keys(project_id).await
    }

    pub async fn delete_stored_key(
        &self,
        project_id: Uuid,
        key_id: Uuid,
        user_id: Uuid,
        ctx: &RequestContext,
    ) -> Result<(), ApiError> {
        self.require_member(project_id, user_id).await?;

        let deleted = self.keys.delete_stored_key(project_id, key_id).await?;
        if deleted == 0 {
            return Err(ApiError::NotFound {
                resource: format!("stored_key:{}", key_id),
            });
        }

        self.append_stored_key_event(
            NewEvent::stored_key_deleted(key_id, project_id)
                .with_request_meta(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
        )
        .await;

        Ok(())
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    async fn require_member(&self, project_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
        if self.keys.is_project_member(project_id, user_id).await? {
            Ok(())
        } else {
            Err(ApiError::AccessDenied)
        }
    }

    /// Stored-key CRUD isn't otherwise transactional, so its events ride
    /// their own short transaction, best-effort.
    async fn append_stored_key_event(&self, event: NewEvent) {
        let result: Result<(), ApiError> = async {
            let mut tx = self.pool.begin().await?;
            EventRepository::append_with_outbox(&mut tx, event).await?;
            tx.commit().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "Failed to append stored-key event");
        }
    }
}

// =============================================================================
// VALIDATION (shared ApiKeyVerifier binding)
// =============================================================================

/// Incoming-request validation: digest lookup, constant-time compare,
/// usability check, best-effort `last_used_at`.
#[async_trait]
impl ApiKeyVerifier for ApiKeyService {
    async fn verify(&self, raw_key: &str) -> Result<Option<VerifiedApiKey>, ApiError> {
        let digest = sha256_hex(raw_key);

        let Some(key) = self.keys.find_by_lookup(&digest).await? else {
            return Ok(None);
        };

        // The index found the row; the compare is still constant-time so a
        // near-miss behaves identically to a full miss.
        if !constant_time_eq(&digest, &key.key_lookup) {
            return Ok(None);
        }

        if !key.is_usable(Utc::now()) {
            return Ok(None);
        }

        // Best-effort usage tracking; eventual is fine
        if let Err(e) = self.keys.touch_last_used(key.id).await {
            warn!(key_id = %key.id, error = %e, "Failed to update last_used_at");
        }

        // Registry row is optional for machine users
        let user = self.users.find_user_by_id(key.user_id).await?;

        Ok(Some(VerifiedApiKey {
            user_id: key.user_id,
            scopes: key.scopes,
            email: user.as_ref().map(|u| u.email.clone()),
            role: user.map(|u| u.role),
        }))
    }
}

impl std::fmt::Debug for ApiKeyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyService")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use shared::auth::tokens::{generate_api_key, sha256_hex};

    #[test]
    fn test_minted_key_and_digest_relationship() {
        let raw = generate_api_key("lano_live_");
        let digest = sha256_hex(&raw);

        // What gets stored is unrecognizable from the raw value
        assert_ne!(raw, digest);
        assert_eq!(digest.len(), 64);
        // The prefix survives in the raw key for UI display
        assert!(raw.starts_with("lano_live_"));
    }
}
