use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Validation};
use serde_json::Value;
use tracing::debug;

use crate::claims::{TokenUse, VerifiedClaims};
use crate::config::AuthSettings;
use crate::error::{AuthError, AuthResult};
use crate::key_cache::KeySet;

/// Verifies provider-issued access tokens against a key set. Performs no I/O.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    issuer: String,
    leeway_seconds: u64,
}

impl TokenVerifier {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            leeway_seconds: 0,
        }
    }

    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(settings.issuer()).with_leeway(settings.leeway_seconds)
    }

    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn verify(&self, token: &str, keys: &KeySet) -> AuthResult<VerifiedClaims> {
        let header =
            decode_header(token).map_err(|err| AuthError::MalformedToken(err.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::UnknownKey("<none>".to_string()))?;
        let key = keys
            .get(&kid)
            .ok_or_else(|| AuthError::UnknownKey(kid.clone()))?;

        // Access tokens from the provider carry no aud claim.
        let mut validation = Validation::new(key.algorithm);
        validation.validate_aud = false;
        validation.leeway = self.leeway_seconds;

        let payload = decode::<Value>(token, &key.decoding, &validation)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::VerificationFailed(err.to_string()),
            })?
            .claims;

        let issuer = payload.get("iss").and_then(Value::as_str).unwrap_or_default();
        if issuer != self.issuer {
            return Err(AuthError::WrongIssuer(issuer.to_string()));
        }

        let token_use = payload
            .get("token_use")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if TokenUse::parse(token_use) != TokenUse::Access {
            return Err(AuthError::WrongTokenUse(token_use.to_string()));
        }

        let claims = VerifiedClaims::try_from(payload)?;
        debug!(kid = %kid, subject = %claims.subject, "verified access token");
        Ok(claims)
    }
}

/// Key id declared in the token header, without verifying anything.
pub fn peek_key_id(token: &str) -> Option<String> {
    decode_header(token).ok().and_then(|header| header.kid)
}
