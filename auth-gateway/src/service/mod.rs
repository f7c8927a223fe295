//! # Service Layer
//!
//! Business logic, one service per subsystem:
//!
//! | Service | Responsibility |
//! |---------|----------------|
//! | [`OAuthService`] | authorize / token / revoke / introspect / device flow |
//! | [`SessionService`] | login bridge: password verification, registry upsert, cookies |
//! | [`ApiKeyService`] | first-party keys + stored third-party credentials |
//! | [`AdminService`] | out-of-band bypass login, password change, app registration |
//!
//! External collaborators are trait contracts with production bindings
//! injected at startup; tests substitute in-memory fakes:
//!
//! | Trait | Production binding |
//! |-------|--------------------|
//! | [`identity_provider::IdentityProvider`] | [`identity_provider::HttpIdentityProvider`] (reqwest) |
//! | [`encryptor::Encryptor`] | [`encryptor::AesGcmEncryptor`] (AES-256-GCM) |

pub mod admin_service;
pub mod api_key_service;
pub mod encryptor;
pub mod identity_provider;
pub mod oauth_service;
pub mod rate_limiter;
pub mod session_service;

pub use admin_service::AdminService;
pub use api_key_service::ApiKeyService;
pub use oauth_service::OAuthService;
pub use rate_limiter::RateLimiter;
pub use session_service::SessionService;
