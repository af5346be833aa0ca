use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts, Extensions, HeaderMap, HeaderValue};

use crate::config::AuthSettings;
#[cfg(feature = "dev-bypass")]
use crate::dev_bypass::DevSubject;
use crate::error::AuthError;
use crate::identity::{IdentityResolver, RequestCredentials, UserIdentity};

/// The caller's resolved identity for the current request.
///
/// Resolved at most once: a guard middleware or an earlier extractor leaves it in
/// the request extensions and later extractions reuse it.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserIdentity);

impl CurrentUser {
    pub fn into_inner(self) -> UserIdentity {
        self.0
    }
}

impl std::ops::Deref for CurrentUser {
    type Target = UserIdentity;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    Arc<IdentityResolver>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<CurrentUser>() {
            return Ok(existing.clone());
        }

        let resolver = Arc::<IdentityResolver>::from_ref(state);
        let credentials =
            credentials_from_request(&parts.headers, &parts.extensions, resolver.settings());
        let current = CurrentUser(resolver.resolve(&credentials).await?);
        parts.extensions.insert(current.clone());
        Ok(current)
    }
}

/// Collect the bearer token and, only when the bypass is enabled, the dev override.
pub fn credentials_from_request(
    headers: &HeaderMap,
    extensions: &Extensions,
    settings: &AuthSettings,
) -> RequestCredentials {
    RequestCredentials {
        bearer_token: headers.get(AUTHORIZATION).and_then(parse_bearer),
        dev_subject: dev_subject(extensions, settings),
    }
}

#[cfg(feature = "dev-bypass")]
fn dev_subject(extensions: &Extensions, settings: &AuthSettings) -> Option<String> {
    if !settings.dev_bypass_enabled() {
        return None;
    }
    extensions
        .get::<DevSubject>()
        .map(|DevSubject(subject)| subject.clone())
}

#[cfg(not(feature = "dev-bypass"))]
fn dev_subject(_extensions: &Extensions, _settings: &AuthSettings) -> Option<String> {
    None
}

/// Token from an `Authorization: Bearer <token>` header. Other schemes yield `None`.
pub fn parse_bearer(value: &HeaderValue) -> Option<String> {
    let raw = value.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_owned())
    }
}
