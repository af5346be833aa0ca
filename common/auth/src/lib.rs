//! Bearer-token authentication and role gating for the incident backend.
//!
//! Production requests are resolved token -> [`SigningKeyCache`] ->
//! [`TokenVerifier`] -> [`UserDirectory`]; development requests may instead
//! name a user through the `dev_bypass` channel (compiled with the
//! `dev-bypass` feature). Route groups are gated with
//! a [`RoleGuard`].

pub mod claims;
pub mod config;
#[cfg(feature = "dev-bypass")]
pub mod dev_bypass;
pub mod error;
pub mod extractors;
pub mod guards;
pub mod identity;
pub mod jwks;
pub mod key_cache;
pub mod roles;
pub mod verifier;

pub use claims::{TokenUse, VerifiedClaims};
pub use config::{AuthSettings, ConfigError, Environment};
#[cfg(feature = "dev-bypass")]
pub use dev_bypass::{DevSubject, DEV_USER_HEADER};
pub use error::{AuthError, AuthResult, DirectoryError};
pub use extractors::{credentials_from_request, parse_bearer, CurrentUser};
pub use guards::{require_roles, GuardState, RoleGuard};
pub use identity::{
    IdentityResolver, InMemoryUserDirectory, RequestCredentials, UserDirectory, UserIdentity,
};
pub use jwks::JwksFetcher;
pub use key_cache::{KeySet, KeySource, SigningKey, SigningKeyCache};
pub use roles::{Role, ALL_ROLES};
pub use verifier::{peek_key_id, TokenVerifier};
