use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenUse {
    Access,
    Id,
    Other(String),
}

impl TokenUse {
    pub fn parse(value: &str) -> Self {
        match value {
            "access" => TokenUse::Access,
            "id" => TokenUse::Id,
            other => TokenUse::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TokenUse::Access => "access",
            TokenUse::Id => "id",
            TokenUse::Other(value) => value,
        }
    }
}

impl Serialize for TokenUse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for TokenUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims of a token that passed signature, expiry, issuer and token-use checks.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedClaims {
    pub subject: String,
    pub issuer: String,
    pub token_use: TokenUse,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub groups: Vec<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ClaimsRepr {
    sub: String,
    iss: String,
    token_use: String,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default, rename = "cognito:groups")]
    groups: Vec<String>,
}

impl TryFrom<ClaimsRepr> for VerifiedClaims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        let expires_at = Utc
            .timestamp_opt(value.exp, 0)
            .single()
            .ok_or_else(|| AuthError::VerificationFailed(format!("invalid exp {}", value.exp)))?;

        let issued_at = match value.iat {
            Some(iat) => Some(
                Utc.timestamp_opt(iat, 0)
                    .single()
                    .ok_or_else(|| AuthError::VerificationFailed(format!("invalid iat {iat}")))?,
            ),
            None => None,
        };

        Ok(Self {
            subject: value.sub,
            issuer: value.iss,
            token_use: TokenUse::parse(&value.token_use),
            issued_at,
            expires_at,
            client_id: value.client_id,
            username: value.username,
            groups: value.groups,
            raw: serde_json::Value::Null,
        })
    }
}

impl TryFrom<serde_json::Value> for VerifiedClaims {
    type Error = AuthError;

    fn try_from(value: serde_json::Value) -> AuthResult<Self> {
        let repr: ClaimsRepr = serde_json::from_value(value.clone())
            .map_err(|err| AuthError::VerificationFailed(format!("claim payload: {err}")))?;
        let mut claims = VerifiedClaims::try_from(repr)?;
        claims.raw = value;
        Ok(claims)
    }
}
