//! # Authentication Building Blocks
//!
//! Shared primitives used by the gateway's login bridge, OAuth engine and
//! API-key subsystem:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`jwt`] | Signed session-cookie JWTs (HS256) |
//! | [`password`] | Argon2id hashing for passwords and slow credential hashes |
//! | [`tokens`] | CSPRNG opaque credentials, SHA-256 digests, constant-time compare |
//! | [`middleware`] | Caller resolution: bearer JWT first, API key second |
//!
//! The credential-at-rest policy lives across [`password`] and [`tokens`]:
//! raw values exist only in memory and in the one response that returns
//! them; rows store an Argon2id verification hash (codes, refresh tokens)
//! or a SHA-256 digest (access tokens, API keys), plus a SHA-256 lookup
//! column where the slow hash cannot be indexed.

pub mod jwt;
pub mod middleware;
pub mod password;
pub mod tokens;

pub use jwt::{JwtService, SessionClaims};
pub use middleware::{ApiKeyVerifier, AuthenticatedCaller, CallerResolver, CredentialType};
pub use password::PasswordHasher;
