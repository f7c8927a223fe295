//! # OAuth Protocol Engine
//!
//! The protocol state machines behind `/oauth/*`: Authorization Code +
//! PKCE, Device Authorization (RFC 8628), refresh rotation, revocation
//! (RFC 7009) and introspection (RFC 7662).
//!
//! ## Authorization Code Lifecycle
//!
//! ```text
//! NEW ──(authorize grants)──> PENDING ──(exchange, PKCE ok, fresh)──> CONSUMED (terminal)
//!                               │
//!                               ├──(exchange after expiry)──> rejected: invalid_grant
//!                               └──(second exchange)────────> rejected: invalid_grant
//! ```
//!
//! The exchange consumes the code under a row lock: two concurrent
//! exchanges serialize, exactly one succeeds, the other sees
//! `consumed = true`. A PKCE mismatch rolls the transaction back, so the
//! code is only burned by a successful exchange.
//!
//! ## Refresh Token Lifecycle
//!
//! ```text
//! ACTIVE ──(refresh grant)──> REVOKED(rotated) + successor ACTIVE
//!   │
//!   ├──(explicit revoke)────> REVOKED(revoked)         [chain]
//!   ├──(expiry)─────────────> REVOKED(expired)         [chain]
//!   └──(replay after rotate)─> whole chain REVOKED(replay_detected)
//! ```
//!
//! Replay of a rotated refresh token is treated as theft evidence: the
//! entire chain rooted at the presented token - including the successor
//! pair the legitimate client may still be using - is revoked.
//!
//! ## Transaction Boundaries
//!
//! Every grant runs one transaction covering the credential mutation, the
//! token inserts and the event + outbox append. Either all of it is
//! visible or none of it is.

use chrono::{Duration as ChronoDuration, Utc};
use shared::auth::password::PasswordHasher;
use shared::auth::tokens::{generate_opaque_token, generate_user_code, sha256_hex};
use shared::config::OAuthConfig;
use shared::errors::{ApiError, OAuthError};
use sqlx::{PgConnection, PgPool};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::domain::entities::{
    device_status, revocation_reason, DeviceAuthorization, NewAuthorizationCode, OAuthClient,
    TokenPair,
};
use crate::domain::events::NewEvent;
use crate::domain::pkce::{self, CodeChallengeMethod};
use crate::domain::scopes::resolve_scopes;
use crate::repository::device_repository::NewDeviceAuthorization;
use crate::repository::token_repository::{InsertedPair, NewTokenPair};
use crate::repository::{
    ClientRepository, CodeRepository, DeviceRepository, EventRepository, TokenRepository,
};

// =============================================================================
// REQUEST / RESPONSE SHAPES
// =============================================================================

/// Caller context threaded through for audit metadata.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Parameters of a `GET /oauth/authorize` request, post-DTO-validation.
#[derive(Debug, Clone)]
pub struct AuthorizeParams {
    pub client_id: String,
    pub response_type: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Outcome of an authorize request. The handler turns each variant into a
/// 302.
#[derive(Debug, Clone)]
pub enum AuthorizeOutcome {
    /// Code granted: redirect to the client with `code` (+ `state`).
    Granted { redirect_url: String },
    /// Client and redirect URI were validated, so the error is reported by
    /// redirect per RFC 6749 (`error`, `error_description`, `state`).
    ErrorRedirect { redirect_url: String },
    /// No session user: bounce into the login bridge, preserving the
    /// original authorize URL. Not an error.
    LoginRequired { login_url: String },
}

/// Parameters of a `POST /oauth/token` request.
#[derive(Debug, Clone, Default)]
pub struct TokenParams {
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub device_code: Option<String>,
    pub scope: Option<String>,
}

/// RFC 8628 device authorization response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceAuthorizationResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_in: i64,
    pub interval: i64,
}

/// RFC 7662 introspection response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked: Option<bool>,
}

impl IntrospectionResponse {
    fn inactive() -> Self {
        Self {
            active: false,
            client_id: None,
            user_id: None,
            scope: None,
            token_type: None,
            exp: None,
            iat: None,
            revoked: None,
        }
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// The OAuth protocol engine.
#[derive(Clone)]
pub struct OAuthService {
    pool: PgPool,
    clients: ClientRepository,
    codes: CodeRepository,
    tokens: TokenRepository,
    devices: DeviceRepository,
    /// Argon2id with the credential cost profile (codes, refresh tokens)
    credential_hasher: PasswordHasher,
    config: OAuthConfig,
    /// Public base URL, for login redirects and verification URIs
    auth_base_url: String,
}

impl OAuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        clients: ClientRepository,
        codes: CodeRepository,
        tokens: TokenRepository,
        devices: DeviceRepository,
        config: OAuthConfig,
        auth_base_url: String,
    ) -> Self {
        Self {
            pool,
            clients,
            codes,
            tokens,
            devices,
            credential_hasher: PasswordHasher::credential(),
            config,
            auth_base_url: auth_base_url.trim_end_matches('/').to_string(),
        }
    }

    // =========================================================================
    // AUTHORIZE
    // =========================================================================

    /// Handles `GET /oauth/authorize`.
    ///
    /// `session_user` is the end-user resolved from the session cookie by
    /// the handler (None = not signed in); `original_url` is the full
    /// authorize URL, preserved through the login bounce.
    ///
    /// Errors returned as `Err` occurred before the client and redirect URI
    /// could be trusted and must be reported directly as JSON; once both
    /// are validated, failures become [`AuthorizeOutcome::ErrorRedirect`].
    pub async fn authorize(
        &self,
        params: AuthorizeParams,
        session_user: Option<Uuid>,
        original_url: &str,
        ctx: &RequestContext,
    ) -> Result<AuthorizeOutcome, OAuthError> {
        // -- syntactic checks: fail without redirect -------------------------
        if params.response_type != "code" {
            return Err(OAuthError::invalid_request(
                "response_type must be 'code'",
            ));
        }

        if self.config.enforce_state_parameter && params.state.is_none() {
            return Err(OAuthError::invalid_request("state parameter is required"));
        }

        // -- client: fail without redirect -----------------------------------
        let client = self.require_active_client(&params.client_id).await?;

        // -- redirect URI: exact string match, no normalization --------------
        if !client
            .allowed_redirect_uris
            .iter()
            .any(|uri| uri == &params.redirect_uri)
        {
            return Err(OAuthError::invalid_request(
                "redirect_uri is not registered for this client",
            ));
        }

        // From here on the client and redirect URI are trusted; protocol
        // errors are reported by redirect.

        // -- PKCE policy ------------------------------------------------------
        let method = match CodeChallengeMethod::parse(params.code_challenge_method.as_deref()) {
            Ok(method) => method,
            Err(e) => return Ok(self.error_redirect(&params, e)),
        };

        let pkce_required = client.require_pkce || self.config.require_pkce;
        if pkce_required && params.code_challenge.is_none() {
            return Ok(self.error_redirect(
                &params,
                OAuthError::invalid_request("code_challenge is required for this client"),
            ));
        }

        if params.code_challenge.is_some() {
            let method_allowed = client
                .allowed_code_challenge_methods
                .iter()
                .any(|m| m == method.as_str())
                && (method != CodeChallengeMethod::Plain || self.config.allow_plain_pkce);
            if !method_allowed {
                return Ok(self.error_redirect(
                    &params,
                    OAuthError::invalid_request(format!(
                        "code_challenge_method '{}' is not permitted for this client",
                        method.as_str()
                    )),
                ));
            }
        }

        // -- end user ---------------------------------------------------------
        // No session is not an error: bounce through the login bridge and
        // come back with the original query intact.
        let user_id = match session_user {
            Some(user_id) => user_id,
            None => {
                let mut login_url = Url::parse(&format!("{}/web/login", self.auth_base_url))
                    .map_err(|_| OAuthError::server_error())?;
                login_url
                    .query_pairs_mut()
                    .append_pair("return_to", original_url);
                return Ok(AuthorizeOutcome::LoginRequired {
                    login_url: login_url.into(),
                });
            }
        };

        // -- scopes -----------------------------------------------------------
        let scope = match resolve_scopes(params.scope.as_deref(), &client) {
            Ok(scope) => scope,
            Err(e) => return Ok(self.error_redirect(&params, e)),
        };

        // -- mint the code ----------------------------------------------------
        let raw_code = generate_opaque_token();
        let code_lookup = sha256_hex(&raw_code);
        let code_hash = self
            .credential_hasher
            .hash(&raw_code)
            .map_err(|_| OAuthError::server_error())?;

        let ttl = Duration::from_secs(self.config.auth_code_ttl_seconds);
        self.codes
            .create(
                NewAuthorizationCode {
                    code_lookup,
                    code_hash,
                    client_id: client.client_id.clone(),
                    user_id,
                    redirect_uri: params.redirect_uri.clone(),
                    scope,
                    state: params.state.clone(),
                    code_challenge: params.code_challenge.clone(),
                    code_challenge_method: params
                        .code_challenge
                        .is_some()
                        .then(|| method.as_str().to_string()),
                    expires_at: Utc::now() + ChronoDuration::seconds(ttl.as_secs() as i64),
                    ip_address: ctx.ip_address.clone(),
                    user_agent: ctx.user_agent.clone(),
                },
                ttl,
            )
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to persist authorization code");
                OAuthError::server_error()
            })?;

        info!(
            client_id = %client.client_id,
            user_id = %user_id,
            "Authorization code granted"
        );

        // -- success redirect -------------------------------------------------
        let mut redirect = Url::parse(&params.redirect_uri).map_err(|_| {
            OAuthError::invalid_request("redirect_uri is not a valid URL")
        })?;
        redirect.query_pairs_mut().append_pair("code", &raw_code);
        if let Some(state) = &params.state {
            redirect.query_pairs_mut().append_pair("state", state);
        }

        Ok(AuthorizeOutcome::Granted {
            redirect_url: redirect.into(),
        })
    }

    /// Builds the error-report redirect for post-validation failures.
    fn error_redirect(&self, params: &AuthorizeParams, error: OAuthError) -> AuthorizeOutcome {
        let mut redirect = match Url::parse(&params.redirect_uri) {
            Ok(url) => url,
            // The URI was exact-matched against the registration, so this
            // only fires for a malformed *registered* URI.
            Err(_) => {
                return AuthorizeOutcome::ErrorRedirect {
                    redirect_url: params.redirect_uri.clone(),
                }
            }
        };

        {
            let mut query = redirect.query_pairs_mut();
            query.append_pair("error", error.kind.as_str());
            query.append_pair("error_description", &error.description);
            if let Some(state) = &params.state {
                query.append_pair("state", state);
            }
        }

        AuthorizeOutcome::ErrorRedirect {
            redirect_url: redirect.into(),
        }
    }

    // =========================================================================
    // TOKEN
    // =========================================================================

    /// Handles `POST /oauth/token` - all three grant families.
    pub async fn token(
        &self,
        params: TokenParams,
        ctx: &RequestContext,
    ) -> Result<TokenPair, OAuthError> {
        let grant_type = params.grant_type.clone();
        match grant_type.as_str() {
            "authorization_code" => self.exchange_authorization_code(params, ctx).await,
            "refresh_token" => self.refresh_grant(params, ctx).await,
            "urn:ietf:params:oauth:grant-type:device_code" => {
                self.device_code_grant(params, ctx).await
            }
            other => Err(OAuthError::unsupported_grant_type(format!(
                "Unsupported grant_type '{}'",
                other
            ))),
        }
    }

    /// `grant_type=authorization_code` - the PKCE-bound exchange.
    async fn exchange_authorization_code(
        &self,
        params: TokenParams,
        ctx: &RequestContext,
    ) -> Result<TokenPair, OAuthError> {
        let client = self.require_active_client(&params.client_id).await?;
        self.authenticate_client(&client, params.client_secret.as_deref())?;

        let raw_code = params
            .code
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_request("code is required"))?;
        let redirect_uri = params
            .redirect_uri
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_request("redirect_uri is required"))?;

        let mut tx = self.pool.begin().await.map_err(|_| OAuthError::server_error())?;

        // Row lock on the hashed code: racing exchanges serialize here.
        let code = CodeRepository::lock_by_lookup(&mut tx, &sha256_hex(raw_code))
            .await?
            .ok_or_else(|| OAuthError::invalid_grant("Invalid authorization code"))?;

        if code.client_id != client.client_id {
            return Err(OAuthError::invalid_grant(
                "Authorization code was issued to a different client",
            ));
        }

        // Byte-for-byte, no normalization: must equal the URI recorded at
        // code issuance.
        if code.redirect_uri != redirect_uri {
            return Err(OAuthError::invalid_grant("redirect_uri mismatch"));
        }

        if code.consumed {
            warn!(client_id = %client.client_id, "Authorization code replay attempt");
            return Err(OAuthError::invalid_grant("Authorization code already used"));
        }

        if code.is_expired(Utc::now()) {
            return Err(OAuthError::invalid_grant("Authorization code expired"));
        }

        // The argon2 column is the verification authority; the sha256
        // lookup only found the row.
        if !self
            .credential_hasher
            .verify(raw_code, &code.code_hash)
            .map_err(|_| OAuthError::server_error())?
        {
            return Err(OAuthError::invalid_grant("Invalid authorization code"));
        }

        // PKCE: recompute challenge' = method(verifier), constant-time
        // compare against the stored challenge.
        if let Some(stored_challenge) = &code.code_challenge {
            let verifier = params
                .code_verifier
                .as_deref()
                .ok_or_else(|| OAuthError::invalid_request("code_verifier is required"))?;
            let method = CodeChallengeMethod::parse(code.code_challenge_method.as_deref())?;
            pkce::verify_challenge(verifier, method, stored_challenge)?;
        }

        // All checks passed under the lock: burn the code.
        CodeRepository::mark_consumed(&mut tx, code.id).await?;

        let (pair, inserted) = self
            .insert_pair(&mut tx, &client.client_id, code.user_id, code.scope.clone(), None)
            .await?;

        EventRepository::append_with_outbox(
            &mut tx,
            NewEvent::token_issued(
                inserted.refresh_token_id,
                inserted.access_token_id,
                &client.client_id,
                code.user_id,
                &pair.scope,
                "authorization_code",
            )
            .with_request_meta(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
        )
        .await?;

        tx.commit().await.map_err(|_| OAuthError::server_error())?;

        self.codes.drop_cache(&code.code_lookup).await;

        info!(
            client_id = %client.client_id,
            user_id = %code.user_id,
            "Authorization code exchanged"
        );

        Ok(pair)
    }

    /// `grant_type=refresh_token` - rotation with replay defense.
    async fn refresh_grant(
        &self,
        params: TokenParams,
        ctx: &RequestContext,
    ) -> Result<TokenPair, OAuthError> {
        let client = self.require_active_client(&params.client_id).await?;
        self.authenticate_client(&client, params.client_secret.as_deref())?;

        let raw_refresh = params
            .refresh_token
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_request("refresh_token is required"))?;

        let mut tx = self.pool.begin().await.map_err(|_| OAuthError::server_error())?;

        let token = TokenRepository::lock_refresh_by_lookup(&mut tx, &sha256_hex(raw_refresh))
            .await?
            .ok_or_else(|| OAuthError::invalid_grant("Invalid refresh token"))?;

        if token.client_id != client.client_id {
            return Err(OAuthError::invalid_grant(
                "Refresh token was issued to a different client",
            ));
        }

        // Replay: a rotated token resurfaced. Treat as theft evidence -
        // kill the whole chain, commit THAT, and fail the request.
        if token.revoked {
            warn!(
                client_id = %client.client_id,
                token_id = %token.id,
                "Refresh token replay detected; revoking chain"
            );
            let revoked =
                TokenRepository::revoke_chain(&mut tx, token.id, revocation_reason::REPLAY_DETECTED)
                    .await?;
            EventRepository::append_with_outbox(
                &mut tx,
                NewEvent::token_revoked(
                    token.id,
                    token.user_id,
                    revocation_reason::REPLAY_DETECTED,
                    true,
                )
                .with_request_meta(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
            )
            .await?;
            tx.commit().await.map_err(|_| OAuthError::server_error())?;

            info!(revoked_tokens = revoked, "Replay defense committed");
            return Err(OAuthError::invalid_grant("Refresh token has been revoked"));
        }

        // Found-but-expired: transparently revoke the chain and reject.
        if token.is_expired(Utc::now()) {
            TokenRepository::revoke_chain(&mut tx, token.id, revocation_reason::EXPIRED).await?;
            EventRepository::append_with_outbox(
                &mut tx,
                NewEvent::token_revoked(token.id, token.user_id, revocation_reason::EXPIRED, true),
            )
            .await?;
            tx.commit().await.map_err(|_| OAuthError::server_error())?;
            return Err(OAuthError::invalid_grant("Refresh token expired"));
        }

        if !self
            .credential_hasher
            .verify(raw_refresh, &token.token_hash)
            .map_err(|_| OAuthError::server_error())?
        {
            return Err(OAuthError::invalid_grant("Invalid refresh token"));
        }

        // Optional scope narrowing: the new grant may carry a subset of the
        // original scopes, never more.
        let scope = match params.scope.as_deref() {
            None => token.scope.clone(),
            Some(requested) => {
                let requested: Vec<String> =
                    requested.split_whitespace().map(String::from).collect();
                if requested.iter().any(|s| !token.scope.contains(s)) {
                    return Err(OAuthError::invalid_scope(
                        "Requested scope exceeds the original grant",
                    ));
                }
                requested
            }
        };

        // Rotate: predecessor → rotated, its other descendants →
        // ancestor_rotated, then the successor pair rooted at it.
        TokenRepository::revoke_single(&mut tx, token.id, revocation_reason::ROTATED).await?;
        TokenRepository::revoke_descendants(
            &mut tx,
            token.id,
            revocation_reason::ANCESTOR_ROTATED,
        )
        .await?;

        let (pair, inserted) = self
            .insert_pair(&mut tx, &client.client_id, token.user_id, scope, Some(token.id))
            .await?;

        EventRepository::append_with_outbox(
            &mut tx,
            NewEvent::token_rotated(token.id, inserted.refresh_token_id, &client.client_id)
                .with_request_meta(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
        )
        .await?;

        tx.commit().await.map_err(|_| OAuthError::server_error())?;

        info!(
            client_id = %client.client_id,
            user_id = %token.user_id,
            "Refresh token rotated"
        );

        Ok(pair)
    }

    /// `grant_type=urn:ietf:params:oauth:grant-type:device_code` - polling.
    async fn device_code_grant(
        &self,
        params: TokenParams,
        ctx: &RequestContext,
    ) -> Result<TokenPair, OAuthError> {
        let client = self.require_active_client(&params.client_id).await?;

        let raw_device_code = params
            .device_code
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_request("device_code is required"))?;

        let mut tx = self.pool.begin().await.map_err(|_| OAuthError::server_error())?;

        let device = DeviceRepository::lock_by_lookup(&mut tx, &sha256_hex(raw_device_code))
            .await?
            .ok_or_else(|| OAuthError::invalid_grant("Invalid device code"))?;

        if device.client_id != client.client_id {
            return Err(OAuthError::invalid_grant(
                "Device code was issued to a different client",
            ));
        }

        let now = Utc::now();

        // Lazy expiry: the row transitions when the deadline is first
        // observed past.
        if device.status == device_status::PENDING && device.is_expired(now) {
            DeviceRepository::set_status(&mut tx, device.id, device_status::EXPIRED, None).await?;
            tx.commit().await.map_err(|_| OAuthError::server_error())?;
            return Err(OAuthError::expired_token());
        }

        match device.status.as_str() {
            device_status::PENDING => {
                // Poll pacing: faster than the advertised interval earns a
                // slow_down and a durable +5s penalty.
                let too_fast = device.last_polled_at.is_some_and(|last| {
                    now - last < ChronoDuration::seconds(device.interval_seconds as i64)
                });
                DeviceRepository::record_poll(&mut tx, device.id, too_fast).await?;
                tx.commit().await.map_err(|_| OAuthError::server_error())?;

                if too_fast {
                    Err(OAuthError::slow_down())
                } else {
                    Err(OAuthError::authorization_pending())
                }
            }
            device_status::APPROVED => {
                if !self
                    .credential_hasher
                    .verify(raw_device_code, &device.device_code_hash)
                    .map_err(|_| OAuthError::server_error())?
                {
                    return Err(OAuthError::invalid_grant("Invalid device code"));
                }

                let user_id = device.user_id.ok_or_else(OAuthError::server_error)?;

                let (pair, inserted) = self
                    .insert_pair(&mut tx, &client.client_id, user_id, device.scope.clone(), None)
                    .await?;

                DeviceRepository::set_status(&mut tx, device.id, device_status::CONSUMED, None)
                    .await?;

                EventRepository::append_with_outbox(
                    &mut tx,
                    NewEvent::token_issued(
                        inserted.refresh_token_id,
                        inserted.access_token_id,
                        &client.client_id,
                        user_id,
                        &pair.scope,
                        "device_code",
                    )
                    .with_request_meta(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
                )
                .await?;

                tx.commit().await.map_err(|_| OAuthError::server_error())?;

                info!(
                    client_id = %client.client_id,
                    user_id = %user_id,
                    "Device authorization completed"
                );

                Ok(pair)
            }
            device_status::DENIED => {
                Err(OAuthError::access_denied("User denied the request"))
            }
            device_status::EXPIRED => Err(OAuthError::expired_token()),
            // consumed or anything else
            _ => Err(OAuthError::invalid_grant("Device code already used")),
        }
    }

    // =========================================================================
    // DEVICE AUTHORIZATION START
    // =========================================================================

    /// Handles `POST /oauth/device`: starts a device authorization.
    pub async fn start_device_authorization(
        &self,
        client_id: &str,
        scope: Option<&str>,
    ) -> Result<DeviceAuthorizationResponse, OAuthError> {
        let client = self.require_active_client(client_id).await?;
        let scope = resolve_scopes(scope, &client)?;

        let raw_device_code = generate_opaque_token();
        let device_code_hash = self
            .credential_hasher
            .hash(&raw_device_code)
            .map_err(|_| OAuthError::server_error())?;

        let verification_uri = format!("{}/web/device", self.auth_base_url);
        let expires_at =
            Utc::now() + ChronoDuration::seconds(self.config.device_code_ttl_seconds as i64);

        // The short user code can collide with another pending
        // authorization; regenerate on conflict.
        let mut device = None;
        for _ in 0..3 {
            let candidate = NewDeviceAuthorization {
                device_code_lookup: sha256_hex(&raw_device_code),
                device_code_hash: device_code_hash.clone(),
                user_code: generate_user_code(),
                client_id: client.client_id.clone(),
                scope: scope.clone(),
                verification_uri: verification_uri.clone(),
                interval_seconds: self.config.device_poll_interval_seconds as i32,
                expires_at,
            };
            match self.devices.create(candidate).await {
                Ok(created) => {
                    device = Some(created);
                    break;
                }
                Err(ApiError::Conflict { .. }) => continue,
                Err(e) => {
                    warn!(error = %e, "Failed to create device authorization");
                    return Err(OAuthError::server_error());
                }
            }
        }
        let device = device.ok_or_else(OAuthError::server_error)?;

        info!(
            client_id = %client.client_id,
            user_code = %device.user_code,
            "Device authorization started"
        );

        let verification_uri_complete =
            format!("{}?user_code={}", device.verification_uri, device.user_code);

        Ok(DeviceAuthorizationResponse {
            device_code: raw_device_code,
            user_code: device.user_code,
            verification_uri: device.verification_uri,
            verification_uri_complete,
            expires_in: self.config.device_code_ttl_seconds as i64,
            interval: device.interval_seconds as i64,
        })
    }

    /// User decision at the verification URL: approve or deny by user code.
    ///
    /// Called from the web bridge with a signed-in user; polling never
    /// advances state, only this does.
    pub async fn decide_device_authorization(
        &self,
        user_code: &str,
        user_id: Uuid,
        approve: bool,
        ctx: &RequestContext,
    ) -> Result<DeviceAuthorization, ApiError> {
        let mut tx = self.pool.begin().await?;

        let device = DeviceRepository::lock_pending_by_user_code(&mut tx, user_code)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("device_authorization:{}", user_code),
            })?;

        if device.is_expired(Utc::now()) {
            DeviceRepository::set_status(&mut tx, device.id, device_status::EXPIRED, None).await?;
            tx.commit().await?;
            return Err(ApiError::BadRequest {
                message: "Device code has expired".to_string(),
            });
        }

        let (status, action) = if approve {
            (device_status::APPROVED, "device_approved")
        } else {
            (device_status::DENIED, "device_denied")
        };

        DeviceRepository::set_status(&mut tx, device.id, status, approve.then_some(user_id))
            .await?;

        EventRepository::append_with_outbox(
            &mut tx,
            NewEvent::auth_event_logged(Some(user_id), action, true, None, ctx.ip_address.as_deref()),
        )
        .await?;

        tx.commit().await?;

        info!(user_code = %device.user_code, approved = approve, "Device authorization decided");

        Ok(device)
    }

    // =========================================================================
    // REVOKE & INTROSPECT
    // =========================================================================

    /// Handles `POST /oauth/revoke` (RFC 7009).
    ///
    /// Unknown tokens succeed silently. A refresh token takes its full
    /// descendant chain down; an access token dies alone.
    pub async fn revoke(
        &self,
        raw_token: &str,
        _token_type_hint: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<(), OAuthError> {
        let Some(token) = self.tokens.find_by_lookup(&sha256_hex(raw_token)).await? else {
            return Ok(());
        };

        if token.revoked {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(|_| OAuthError::server_error())?;

        let chain = token.is_refresh();
        if chain {
            TokenRepository::revoke_chain(&mut tx, token.id, revocation_reason::REVOKED).await?;
        } else {
            TokenRepository::revoke_single(&mut tx, token.id, revocation_reason::REVOKED).await?;
        }

        EventRepository::append_with_outbox(
            &mut tx,
            NewEvent::token_revoked(token.id, token.user_id, revocation_reason::REVOKED, chain)
                .with_request_meta(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
        )
        .await?;

        tx.commit().await.map_err(|_| OAuthError::server_error())?;

        info!(token_id = %token.id, chain = chain, "Token revoked");

        Ok(())
    }

    /// Handles `POST /oauth/introspect` (RFC 7662).
    ///
    /// `active` iff the token exists, is not revoked, and is not expired.
    pub async fn introspect(&self, raw_token: &str) -> Result<IntrospectionResponse, OAuthError> {
        let Some(token) = self.tokens.find_by_lookup(&sha256_hex(raw_token)).await? else {
            return Ok(IntrospectionResponse::inactive());
        };

        let now = Utc::now();
        Ok(IntrospectionResponse {
            active: token.is_active(now),
            client_id: Some(token.client_id.clone()),
            user_id: Some(token.user_id),
            scope: Some(token.scope.join(" ")),
            token_type: Some(token.token_type.clone()),
            exp: Some(token.expires_at.timestamp()),
            iat: Some(token.created_at.timestamp()),
            revoked: Some(token.revoked),
        })
    }

    // =========================================================================
    // SERVER METADATA
    // =========================================================================

    /// RFC 8414 authorization-server metadata.
    pub fn server_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "issuer": self.auth_base_url,
            "authorization_endpoint": format!("{}/oauth/authorize", self.auth_base_url),
            "token_endpoint": format!("{}/oauth/token", self.auth_base_url),
            "revocation_endpoint": format!("{}/oauth/revoke", self.auth_base_url),
            "introspection_endpoint": format!("{}/oauth/introspect", self.auth_base_url),
            "device_authorization_endpoint": format!("{}/oauth/device", self.auth_base_url),
            "response_types_supported": ["code"],
            "grant_types_supported": [
                "authorization_code",
                "refresh_token",
                "urn:ietf:params:oauth:grant-type:device_code"
            ],
            "code_challenge_methods_supported":
                if self.config.allow_plain_pkce { vec!["S256", "plain"] } else { vec!["S256"] },
            "token_endpoint_auth_methods_supported": ["none", "client_secret_post"],
        })
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Client lookup: cache-through, must exist and be active.
    async fn require_active_client(&self, client_id: &str) -> Result<OAuthClient, OAuthError> {
        let client = self
            .clients
            .find_by_id(client_id)
            .await
            .map_err(|e| {
                warn!(error = %e, "Client lookup failed");
                OAuthError::server_error()
            })?
            .ok_or_else(|| OAuthError::invalid_client("Unknown client"))?;

        if !client.is_active() {
            return Err(OAuthError::invalid_client("Client is not active"));
        }

        Ok(client)
    }

    /// Confidential clients must present their secret; public clients rely
    /// on PKCE and present none.
    fn authenticate_client(
        &self,
        client: &OAuthClient,
        client_secret: Option<&str>,
    ) -> Result<(), OAuthError> {
        if client.is_public() {
            return Ok(());
        }

        let secret =
            client_secret.ok_or_else(|| OAuthError::invalid_client("client_secret is required"))?;
        let hash = client
            .client_secret_hash
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_client("Client has no secret configured"))?;

        let valid = self
            .credential_hasher
            .verify(secret, hash)
            .map_err(|_| OAuthError::server_error())?;
        if !valid {
            return Err(OAuthError::invalid_client("Invalid client credentials"));
        }

        Ok(())
    }

    /// Generates and inserts a refresh + access pair on the caller's
    /// transaction. Refresh tokens get the slow verification hash; access
    /// tokens are verified on every request and use the fast digest.
    async fn insert_pair(
        &self,
        conn: &mut PgConnection,
        client_id: &str,
        user_id: Uuid,
        scope: Vec<String>,
        refresh_parent_id: Option<Uuid>,
    ) -> Result<(TokenPair, InsertedPair), OAuthError> {
        let raw_refresh = generate_opaque_token();
        let raw_access = generate_opaque_token();

        let now = Utc::now();
        let access_expires_at =
            now + ChronoDuration::seconds(self.config.access_token_ttl_seconds as i64);
        let refresh_expires_at =
            now + ChronoDuration::seconds(self.config.refresh_token_ttl_seconds as i64);

        let refresh_hash = self
            .credential_hasher
            .hash(&raw_refresh)
            .map_err(|_| OAuthError::server_error())?;
        let access_lookup = sha256_hex(&raw_access);

        let inserted = TokenRepository::insert_pair(
            conn,
            NewTokenPair {
                refresh_lookup: sha256_hex(&raw_refresh),
                refresh_hash,
                access_lookup: access_lookup.clone(),
                access_hash: access_lookup,
                client_id: client_id.to_string(),
                user_id,
                scope: scope.clone(),
                refresh_expires_at,
                access_expires_at,
                refresh_parent_id,
            },
        )
        .await?;

        Ok((
            TokenPair {
                access_token: raw_access,
                refresh_token: raw_refresh,
                access_token_id: inserted.access_token_id,
                refresh_token_id: inserted.refresh_token_id,
                scope,
                expires_in: self.config.access_token_ttl_seconds as i64,
            },
            inserted,
        ))
    }
}

impl std::fmt::Debug for OAuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthService")
            .field("auth_base_url", &self.auth_base_url)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_introspection_inactive_shape() {
        let response = IntrospectionResponse::inactive();
        let json = serde_json::to_value(&response).unwrap();
        // Inactive responses reveal nothing but the flag
        assert_eq!(json, serde_json::json!({ "active": false }));
    }

    #[test]
    fn test_token_params_default_grant_is_rejected_shape() {
        let params = TokenParams::default();
        assert!(params.grant_type.is_empty());
        assert!(params.code.is_none());
    }

    #[test]
    fn test_device_response_serialization() {
        let response = DeviceAuthorizationResponse {
            device_code: "opaque".into(),
            user_code: "ABCD-1234".into(),
            verification_uri: "https://auth.example.com/web/device".into(),
            verification_uri_complete:
                "https://auth.example.com/web/device?user_code=ABCD-1234".into(),
            expires_in: 900,
            interval: 5,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["interval"], 5);
        assert_eq!(json["expires_in"], 900);
        assert!(json["verification_uri_complete"]
            .as_str()
            .unwrap()
            .contains("user_code=ABCD-1234"));
    }
}
