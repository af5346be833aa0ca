#![allow(dead_code)]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use common_auth::{
    AuthSettings, Environment, IdentityResolver, InMemoryUserDirectory, JwksFetcher, Role,
    SigningKeyCache, UserIdentity,
};
use httpmock::prelude::*;
use httpmock::Mock;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::Serialize;
use serde_json::{json, Value};

pub const REGION: &str = "ap-southeast-7";
pub const POOL_ID: &str = "ap-southeast-7_TestPool";
pub const CLIENT_ID: &str = "testclientid123";
pub const PRIMARY_KID: &str = "test-key-1";
pub const ROTATED_KID: &str = "test-key-2";
pub const JWKS_PATH: &str = "/ap-southeast-7_TestPool/.well-known/jwks.json";

pub struct KeyPair {
    pub encoding: EncodingKey,
    pub modulus: String,
    pub exponent: String,
}

impl KeyPair {
    fn generate() -> Self {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("key generation");
        let public_key = private_key.to_public_key();
        let private_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("private pem");

        Self {
            encoding: EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("encoding key"),
            modulus: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            exponent: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }
    }

    pub fn jwk(&self, kid: &str) -> Value {
        json!({
            "kid": kid,
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "n": self.modulus,
            "e": self.exponent
        })
    }
}

pub fn primary_keys() -> &'static KeyPair {
    static KEYS: OnceLock<KeyPair> = OnceLock::new();
    KEYS.get_or_init(KeyPair::generate)
}

pub fn rotated_keys() -> &'static KeyPair {
    static KEYS: OnceLock<KeyPair> = OnceLock::new();
    KEYS.get_or_init(KeyPair::generate)
}

pub fn issuer() -> String {
    format!("https://cognito-idp.{REGION}.amazonaws.com/{POOL_ID}")
}

#[derive(Serialize)]
struct TokenClaims<'a> {
    sub: &'a str,
    iss: &'a str,
    token_use: &'a str,
    client_id: &'a str,
    iat: i64,
    exp: i64,
}

pub struct TokenSpec<'a> {
    pub keys: &'a KeyPair,
    pub kid: &'a str,
    pub subject: &'a str,
    pub issuer: String,
    pub token_use: &'a str,
    pub exp_offset: i64,
}

impl<'a> TokenSpec<'a> {
    pub fn access(subject: &'a str) -> Self {
        Self {
            keys: primary_keys(),
            kid: PRIMARY_KID,
            subject,
            issuer: issuer(),
            token_use: "access",
            exp_offset: 3600,
        }
    }

    pub fn sign(&self) -> String {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: self.subject,
            iss: &self.issuer,
            token_use: self.token_use,
            client_id: CLIENT_ID,
            iat: now,
            exp: now + self.exp_offset,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.to_string());
        encode(&header, &claims, &self.keys.encoding).expect("sign token")
    }
}

pub fn access_token(subject: &str) -> String {
    TokenSpec::access(subject).sign()
}

pub fn mock_jwks<'a>(server: &'a MockServer, keys: &[Value]) -> Mock<'a> {
    let body = json!({ "keys": keys }).to_string();
    server.mock(|when, then| {
        when.method(GET).path(JWKS_PATH);
        then.status(200)
            .header("content-type", "application/json")
            .body(body);
    })
}

pub fn settings(environment: Environment, server: &MockServer) -> AuthSettings {
    AuthSettings::new(environment, REGION, POOL_ID, CLIENT_ID).with_jwks_url(server.url(JWKS_PATH))
}

pub fn resolver(settings: AuthSettings, directory: InMemoryUserDirectory) -> Arc<IdentityResolver> {
    Arc::new(IdentityResolver::from_settings(settings, Arc::new(directory)).expect("resolver"))
}

/// Resolver whose cache refetches immediately on an unseen kid.
pub fn eager_resolver(settings: AuthSettings, directory: InMemoryUserDirectory) -> Arc<IdentityResolver> {
    let fetcher = JwksFetcher::new(settings.jwks_url());
    let cache = SigningKeyCache::new(Arc::new(fetcher), settings.jwks_cache_ttl)
        .with_unknown_kid_refresh_interval(Duration::ZERO);
    Arc::new(IdentityResolver::new(
        Arc::new(settings),
        Arc::new(cache),
        Arc::new(directory),
    ))
}

pub struct Staff {
    pub admin: UserIdentity,
    pub officer: UserIdentity,
    pub disabled: UserIdentity,
}

pub fn staff() -> Staff {
    Staff {
        admin: UserIdentity::new("sub-admin", "Test Admin", Role::Admin).with_email("admin@test.local"),
        officer: UserIdentity::new("sub-officer", "Test Officer", Role::Officer)
            .with_email("officer@test.local"),
        disabled: UserIdentity::new("sub-disabled", "Former Dispatcher", Role::Dispatcher).deactivated(),
    }
}

pub fn staff_directory(staff: &Staff) -> InMemoryUserDirectory {
    InMemoryUserDirectory::with_users([
        staff.admin.clone(),
        staff.officer.clone(),
        staff.disabled.clone(),
    ])
}
