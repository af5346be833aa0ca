use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{AuthError, AuthResult};
use crate::key_cache::{KeySet, KeySource, SigningKey};

/// Fetches the provider's published JWKS document.
#[derive(Clone)]
pub struct JwksFetcher {
    client: Client,
    url: String,
}

impl JwksFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> AuthResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AuthError::JwksFetch(err.to_string()))?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> AuthResult<KeySet> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| AuthError::JwksFetch(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::JwksFetch(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let body: JwksResponse = response
            .json()
            .await
            .map_err(|err| AuthError::JwksDecode(err.to_string()))?;

        parse_keys(body)
    }
}

#[async_trait]
impl KeySource for JwksFetcher {
    async fn fetch_keys(&self) -> AuthResult<KeySet> {
        self.fetch().await
    }
}

fn parse_keys(body: JwksResponse) -> AuthResult<KeySet> {
    let mut keys = Vec::with_capacity(body.keys.len());
    for key in body.keys.into_iter() {
        let Some(kid) = key.kid else {
            warn!("skipping JWKS entry without kid");
            continue;
        };

        let kty = key.kty.as_deref().unwrap_or("RSA");
        if kty != "RSA" {
            warn!(kid = %kid, kty, "skipping JWKS entry with unsupported key type");
            continue;
        }

        let alg = key.alg.as_deref().unwrap_or("RS256");
        if alg != "RS256" {
            warn!(kid = %kid, alg, "skipping JWKS entry with unsupported alg");
            continue;
        }

        if matches!(key.key_use.as_deref(), Some(usage) if usage != "sig") {
            debug!(kid = %kid, "skipping non-signature JWKS entry");
            continue;
        }

        let (Some(modulus), Some(exponent)) = (key.n, key.e) else {
            warn!(kid = %kid, "skipping JWKS entry missing RSA components");
            continue;
        };

        let decoding = DecodingKey::from_rsa_components(&modulus, &exponent).map_err(|err| {
            AuthError::KeyParse {
                kid: kid.clone(),
                reason: err.to_string(),
            }
        })?;
        keys.push(SigningKey::new(kid, Algorithm::RS256, decoding));
    }

    Ok(keys.into_iter().collect())
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    #[serde(default)]
    keys: Vec<JwkEntry>,
}

#[derive(Debug, Deserialize)]
struct JwkEntry {
    kid: Option<String>,
    kty: Option<String>,
    alg: Option<String>,
    #[serde(rename = "use")]
    key_use: Option<String>,
    n: Option<String>,
    e: Option<String>,
}
