//! # Identity Provider Contract
//!
//! Password verification is delegated to an external identity provider;
//! this service never stores end-user passwords (admin bypass accounts are
//! the one deliberate exception, precisely so they work when this provider
//! is down).
//!
//! The trait keeps the login bridge testable: production injects
//! [`HttpIdentityProvider`], tests inject an in-memory fake.

use async_trait::async_trait;
use serde::Deserialize;
use shared::config::IdentityProviderConfig;
use shared::errors::ApiError;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// A user as reported by the identity provider after successful password
/// verification.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedIdentity {
    /// Provider-side user id; adopted as the UAI on first login
    pub id: Uuid,
    pub email: String,
    /// Provider-reported role; defaults to `user` when absent
    #[serde(default)]
    pub role: Option<String>,
}

/// Password verification contract.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verifies an email/password pair.
    ///
    /// `Ok(None)` means the credentials are wrong (indistinguishable from
    /// "no such user" by design). `Err` means the provider itself failed.
    async fn verify_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<VerifiedIdentity>, ApiError>;
}

// =============================================================================
// HTTP Binding
// =============================================================================

/// Production binding: password-grant call against the provider's token
/// endpoint, authenticated with the service key.
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
}

#[derive(Debug, Deserialize)]
struct PasswordGrantResponse {
    user: VerifiedIdentity,
}

impl HttpIdentityProvider {
    /// Builds the client with the configured bounded timeout.
    pub fn new(config: &IdentityProviderConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ApiError::InternalError {
                message: format!("Failed to build identity provider client: {}", e),
            })?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<VerifiedIdentity>, ApiError> {
        let url = format!("{}/token?grant_type=password", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("apikey", &self.service_key)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
            }))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Identity provider unreachable");
                ApiError::ServiceUnavailable {
                    service: "identity-provider".to_string(),
                }
            })?;

        match response.status() {
            status if status.is_success() => {
                let body: PasswordGrantResponse =
                    response.json().await.map_err(|e| ApiError::InternalError {
                        message: format!("Malformed identity provider response: {}", e),
                    })?;
                Ok(Some(body.user))
            }
            // 400/401/403 all mean "credentials rejected"
            status if status.is_client_error() => Ok(None),
            status => {
                warn!(status = %status, "Identity provider error");
                Err(ApiError::ServiceUnavailable {
                    service: "identity-provider".to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for HttpIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdentityProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> IdentityProviderConfig {
        IdentityProviderConfig {
            url: server.uri(),
            service_key: "sk_service_test".into(),
            timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn test_successful_verification() {
        let server = MockServer::start().await;
        let user_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "user": { "id": user_id, "email": "user@example.com", "role": "user" }
            })))
            .mount(&server)
            .await;

        let provider = HttpIdentityProvider::new(&config_for(&server)).unwrap();
        let identity = provider
            .verify_password("user@example.com", "hunter2!")
            .await
            .unwrap()
            .expect("identity");

        assert_eq!(identity.id, user_id);
        assert_eq!(identity.email, "user@example.com");
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_none() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = HttpIdentityProvider::new(&config_for(&server)).unwrap();
        let identity = provider
            .verify_password("user@example.com", "wrong")
            .await
            .unwrap();

        assert!(identity.is_none());
    }

    #[tokio::test]
    async fn test_provider_5xx_is_service_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = HttpIdentityProvider::new(&config_for(&server)).unwrap();
        let result = provider.verify_password("user@example.com", "pw").await;

        assert!(matches!(
            result,
            Err(ApiError::ServiceUnavailable { .. })
        ));
    }
}
