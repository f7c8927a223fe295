//! # API Key Repository
//!
//! Persistence for both key shapes:
//!
//! - **First-party keys** (`auth.api_keys`) - identify a user of this
//!   system; found by SHA-256 digest, verified per request.
//! - **Stored third-party keys** (`auth.projects`, `auth.stored_api_keys`) -
//!   the user's own credentials held encrypted for later programmatic use,
//!   scoped by project with member access control.
//!
//! Deleting a project cascades to its stored keys (FK `ON DELETE CASCADE`).

use crate::domain::entities::{ApiKey, Project, StoredApiKey};
use chrono::{DateTime, Utc};
use shared::errors::ApiError;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Repository for API keys, projects and stored credentials.
#[derive(Debug, Clone)]
pub struct ApiKeyRepository {
    pool: PgPool,
}

/// Parameters for minting a first-party key.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub key_lookup: String,
    pub prefix: String,
    pub user_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub name: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Parameters for storing an encrypted third-party credential.
#[derive(Debug, Clone)]
pub struct NewStoredKey {
    pub project_id: Uuid,
    pub name: String,
    pub environment: String,
    pub encrypted_value: String,
    pub created_by: Uuid,
}

impl ApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // FIRST-PARTY KEYS
    // =========================================================================

    /// Inserts a new key row. Runs on the caller's transaction so the
    /// `ApiKeyCreated` event commits with it.
    pub async fn insert_key(
        conn: &mut PgConnection,
        new_key: NewApiKey,
    ) -> Result<ApiKey, ApiError> {
        let key = sqlx::query_as::<_, ApiKey>(
            r#"
            INSERT INTO auth.api_keys (
                key_lookup, prefix, user_id, organization_id, name, scopes, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&new_key.key_lookup)
        .bind(&new_key.prefix)
        .bind(new_key.user_id)
        .bind(new_key.organization_id)
        .bind(&new_key.name)
        .bind(&new_key.scopes)
        .bind(new_key.expires_at)
        .fetch_one(conn)
        .await?;

        Ok(key)
    }

    /// Finds a key by digest. The validation decision (active/expiry/grace)
    /// belongs to the domain entity.
    pub async fn find_by_lookup(&self, key_lookup: &str) -> Result<Option<ApiKey>, ApiError> {
        let key = sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT * FROM auth.api_keys
            WHERE key_lookup = $1
            "#,
        )
        .bind(key_lookup)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    /// Finds a key by id, constrained to its owner.
    pub async fn find_by_id_for_user(
        &self,
        key_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ApiKey>, ApiError> {
        let key = sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT * FROM auth.api_keys
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(key_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    /// Lists a user's keys, newest first.
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, ApiError> {
        let keys = sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT * FROM auth.api_keys
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    /// Marks a rotated key: inactive, successor recorded, grace window set.
    /// Same transaction as the successor's insert.
    pub async fn mark_rotated(
        conn: &mut PgConnection,
        old_key_id: Uuid,
        new_key_id: Uuid,
        grace_until: Option<DateTime<Utc>>,
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE auth.api_keys
            SET is_active = FALSE, rotated_to = $1, grace_until = $2
            WHERE id = $3 AND is_active = TRUE
            "#,
        )
        .bind(new_key_id)
        .bind(grace_until)
        .bind(old_key_id)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Revokes a key immediately. No grace window.
    pub async fn revoke(conn: &mut PgConnection, key_id: Uuid) -> Result<u64, ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE auth.api_keys
            SET is_active = FALSE, grace_until = NULL
            WHERE id = $1 AND is_active = TRUE
            "#,
        )
        .bind(key_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Best-effort `last_used_at` refresh. Failures are logged by the
    /// caller, never surfaced - validation already succeeded.
    pub async fn touch_last_used(&self, key_id: Uuid) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE auth.api_keys
            SET last_used_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(key_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // PROJECTS
    // =========================================================================

    /// Creates a project and enrolls the creator as its owner.
    ///
    /// # Errors
    ///
    /// `ApiError::Conflict` when the name is taken within the organization.
    pub async fn create_project(
        &self,
        organization_id: Uuid,
        name: &str,
        description: Option<&str>,
        created_by: Uuid,
    ) -> Result<Project, ApiError> {
        let mut tx = self.pool.begin().await?;

        let project = sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO auth.projects (organization_id, name, description, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(name)
        .bind(description)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("projects_organization_id_name_key") {
                    return ApiError::Conflict {
                        resource: "project name".to_string(),
                    };
                }
            }
            ApiError::DatabaseError(e)
        })?;

        sqlx::query(
            r#"
            INSERT INTO auth.project_members (project_id, user_id, role)
            VALUES ($1, $2, 'owner')
            "#,
        )
        .bind(project.id)
        .bind(created_by)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(project)
    }

    pub async fn find_project(&self, project_id: Uuid) -> Result<Option<Project>, ApiError> {
        let project = sqlx::query_as::<_, Project>(
            r#"
            SELECT * FROM auth.projects
            WHERE id = $1
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(project)
    }

    /// Projects the user belongs to.
    pub async fn list_projects_for_user(&self, user_id: Uuid) -> Result<Vec<Project>, ApiError> {
        let projects = sqlx::query_as::<_, Project>(
            r#"
            SELECT p.* FROM auth.projects p
            JOIN auth.project_members m ON m.project_id = p.id
            WHERE m.user_id = $1
            ORDER BY p.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(projects)
    }

    /// Membership check gating stored-key access.
    pub async fn is_project_member(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, ApiError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM auth.project_members
            WHERE project_id = $1 AND user_id = $2
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0 > 0)
    }

    /// Deletes a project; stored keys go with it (FK cascade).
    pub async fn delete_project(&self, project_id: Uuid) -> Result<u64, ApiError> {
        let result = sqlx::query(
            r#"
            DELETE FROM auth.projects
            WHERE id = $1
            "#,
        )
        .bind(project_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // STORED THIRD-PARTY KEYS
    // =========================================================================

    /// Stores an encrypted credential.
    ///
    /// # Errors
    ///
    /// `ApiError::Conflict` on a `(project, name, environment)` collision.
    pub async fn insert_stored_key(
        &self,
        new_key: NewStoredKey,
    ) -> Result<StoredApiKey, ApiError> {
        let key = sqlx::query_as::<_, StoredApiKey>(
            r#"
            INSERT INTO auth.stored_api_keys (
                project_id, name, environment, encrypted_value, created_by
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(new_key.project_id)
        .bind(&new_key.name)
        .bind(&new_key.environment)
        .bind(&new_key.encrypted_value)
        .bind(new_key.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("stored_api_keys_project_id_name_environment_key") {
                    return ApiError::Conflict {
                        resource: "stored key (project, name, environment)".to_string(),
                    };
                }
            }
            ApiError::DatabaseError(e)
        })?;

        Ok(key)
    }

    pub async fn find_stored_key(
        &self,
        project_id: Uuid,
        key_id: Uuid,
    ) -> Result<Option<StoredApiKey>, ApiError> {
        let key = sqlx::query_as::<_, StoredApiKey>(
            r#"
            SELECT * FROM auth.stored_api_keys
            WHERE id = $1 AND project_id = $2
            "#,
        )
        .bind(key_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    pub async fn list_stored_keys(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<StoredApiKey>, ApiError> {
        let keys = sqlx::query_as::<_, StoredApiKey>(
            r#"
            SELECT * FROM auth.stored_api_keys
            WHERE project_id = $1
            ORDER BY name, environment
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    pub async fn delete_stored_key(
        &self,
        project_id: Uuid,
        key_id: Uuid,
    ) -> Result<u64, ApiError> {
        let result = sqlx::query(
            r#"
            DELETE FROM auth.stored_api_keys
            WHERE id = $1 AND project_id = $2
            "#,
        )
        .bind(key_id)
        .bind(project_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_key_carries_digest_not_raw() {
        let new_key = NewApiKey {
            key_lookup: "64-hex-chars-of-sha256".into(),
            prefix: "lano_live_".into(),
            user_id: Uuid::new_v4(),
            organization_id: None,
            name: "deploy-bot".into(),
            scopes: vec!["api:access".into()],
            expires_at: None,
        };
        // The struct has no field that could hold the raw key
        assert_eq!(new_key.prefix, "lano_live_");
    }

    #[test]
    fn test_new_stored_key_environment_defaulting_is_callers_job() {
        let stored = NewStoredKey {
            project_id: Uuid::new_v4(),
            name: "openai".into(),
            environment: "production".into(),
            encrypted_value: "base64-ciphertext".into(),
            created_by: Uuid::new_v4(),
        };
        assert_eq!(stored.environment, "production");
    }
}
