//! # Repository Layer
//!
//! Data access for the credential store. One repository per entity family:
//!
//! | Repository | Tables |
//! |------------|--------|
//! | [`ClientRepository`] | `auth.oauth_clients` |
//! | [`CodeRepository`] | `auth.authorization_codes` |
//! | [`TokenRepository`] | `auth.tokens` |
//! | [`DeviceRepository`] | `auth.device_authorizations` |
//! | [`ApiKeyRepository`] | `auth.api_keys`, `auth.projects`, `auth.project_members`, `auth.stored_api_keys` |
//! | [`UserRepository`] | `auth.users`, `auth.sessions`, `auth.admin_accounts`, `auth.admin_sessions` |
//! | [`EventRepository`] | `auth.events`, `auth.outbox` |
//!
//! ## Query Patterns
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │ Pattern            │ Example                                            │
//! ├────────────────────┼────────────────────────────────────────────────────┤
//! │ Row locks          │ SELECT ... FOR UPDATE (code consume, rotation)     │
//! │ Advisory locks     │ pg_advisory_xact_lock (event versioning)           │
//! │ Recursive CTE      │ WITH RECURSIVE chain AS ... (chain revocation)     │
//! │ Returning          │ INSERT ... RETURNING * (to get generated fields)   │
//! │ Parameterized      │ Always $1, $2 (never string interpolation)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Methods with multi-row invariants take `&mut PgConnection` so the service
//! layer can compose them with the event append inside one transaction.
//! Single-statement reads take the pool.

pub mod api_key_repository;
pub mod client_repository;
pub mod code_repository;
pub mod device_repository;
pub mod event_repository;
pub mod token_repository;
pub mod user_repository;

pub use api_key_repository::ApiKeyRepository;
pub use client_repository::ClientRepository;
pub use code_repository::CodeRepository;
pub use device_repository::DeviceRepository;
pub use event_repository::EventRepository;
pub use token_repository::TokenRepository;
pub use user_repository::UserRepository;
