use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_REGION: &str = "ap-southeast-7";
pub const DEFAULT_JWKS_CACHE_TTL_SECS: u64 = 86_400;
pub const DEFAULT_JWKS_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_UNKNOWN_KID_REFRESH_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ENVIRONMENT must be one of development, staging, production (got '{0}')")]
    InvalidEnvironment(String),
    #[error("{key} must be a non-negative integer (got '{value}')")]
    InvalidNumber { key: &'static str, value: String },
}

/// Deployment tier the process runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidEnvironment(value.to_string())),
        }
    }
}

/// Runtime configuration for token verification and the development bypass.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub environment: Environment,
    /// Only honoured when `environment` is development.
    pub dev_skip_auth: bool,
    pub aws_region: String,
    pub user_pool_id: String,
    pub app_client_id: String,
    pub jwks_cache_ttl: Duration,
    pub jwks_url_override: Option<String>,
    pub jwks_timeout: Duration,
    /// Allowable clock skew in seconds when validating exp.
    pub leeway_seconds: u64,
    /// Minimum snapshot age before an unseen kid forces a key-set refresh.
    pub unknown_kid_refresh_interval: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            dev_skip_auth: false,
            aws_region: DEFAULT_REGION.to_string(),
            user_pool_id: String::new(),
            app_client_id: String::new(),
            jwks_cache_ttl: Duration::from_secs(DEFAULT_JWKS_CACHE_TTL_SECS),
            jwks_url_override: None,
            jwks_timeout: Duration::from_secs(DEFAULT_JWKS_TIMEOUT_SECS),
            leeway_seconds: 0,
            unknown_kid_refresh_interval: Duration::from_secs(DEFAULT_UNKNOWN_KID_REFRESH_SECS),
        }
    }
}

impl AuthSettings {
    /// Settings for a configured identity provider in the given tier.
    pub fn new(
        environment: Environment,
        region: impl Into<String>,
        user_pool_id: impl Into<String>,
        app_client_id: impl Into<String>,
    ) -> Self {
        Self {
            environment,
            aws_region: region.into(),
            user_pool_id: user_pool_id.into(),
            app_client_id: app_client_id.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let environment = match lookup("ENVIRONMENT").and_then(|v| normalize_optional(&v)) {
            Some(value) => value.parse()?,
            None => defaults.environment,
        };
        let dev_skip_auth = lookup("DEV_SKIP_AUTH")
            .map(|value| parse_bool(&value))
            .unwrap_or(false);
        let aws_region = lookup("AWS_REGION")
            .and_then(|v| normalize_optional(&v))
            .unwrap_or(defaults.aws_region);
        let user_pool_id = lookup("COGNITO_USER_POOL_ID")
            .and_then(|v| normalize_optional(&v))
            .unwrap_or_default();
        let app_client_id = lookup("COGNITO_APP_CLIENT_ID")
            .and_then(|v| normalize_optional(&v))
            .unwrap_or_default();
        let jwks_url_override = lookup("JWKS_URL").and_then(|v| normalize_optional(&v));

        let jwks_cache_ttl = seconds(&lookup, "JWKS_CACHE_TTL")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.jwks_cache_ttl);
        let jwks_timeout = seconds(&lookup, "JWKS_TIMEOUT_SECONDS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.jwks_timeout);
        let leeway_seconds = seconds(&lookup, "JWT_LEEWAY_SECONDS")?.unwrap_or(0);

        Ok(Self {
            environment,
            dev_skip_auth,
            aws_region,
            user_pool_id,
            app_client_id,
            jwks_cache_ttl,
            jwks_url_override,
            jwks_timeout,
            leeway_seconds,
            unknown_kid_refresh_interval: defaults.unknown_kid_refresh_interval,
        })
    }

    pub fn with_dev_skip_auth(mut self, enabled: bool) -> Self {
        self.dev_skip_auth = enabled;
        self
    }

    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url_override = Some(url.into());
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_cache_ttl = ttl;
        self
    }

    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// True only in development with explicit opt-in and the channel compiled in.
    pub fn dev_bypass_enabled(&self) -> bool {
        cfg!(feature = "dev-bypass") && self.is_development() && self.dev_skip_auth
    }

    pub fn provider_configured(&self) -> bool {
        !self.user_pool_id.is_empty() && !self.app_client_id.is_empty()
    }

    pub fn issuer(&self) -> String {
        format!(
            "https://cognito-idp.{}.amazonaws.com/{}",
            self.aws_region, self.user_pool_id
        )
    }

    pub fn jwks_url(&self) -> String {
        match &self.jwks_url_override {
            Some(url) => url.clone(),
            None => format!("{}/.well-known/jwks.json", self.issuer()),
        }
    }
}

fn seconds<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).and_then(|v| normalize_optional(&v)) {
        Some(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        None => Ok(None),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<AuthSettings, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AuthSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_are_fail_closed() {
        let settings = settings_from(&[]).expect("defaults");
        assert_eq!(settings.environment, Environment::Production);
        assert!(!settings.dev_bypass_enabled());
        assert!(!settings.provider_configured());
        assert_eq!(settings.jwks_cache_ttl, Duration::from_secs(86_400));
        assert_eq!(settings.aws_region, "ap-southeast-7");
    }

    #[cfg(feature = "dev-bypass")]
    #[test]
    fn bypass_requires_development_and_flag() {
        let dev = settings_from(&[("ENVIRONMENT", "Development"), ("DEV_SKIP_AUTH", "true")])
            .expect("dev settings");
        assert!(dev.dev_bypass_enabled());

        let prod = settings_from(&[("ENVIRONMENT", "production"), ("DEV_SKIP_AUTH", "true")])
            .expect("prod settings");
        assert!(!prod.dev_bypass_enabled());

        let staging = settings_from(&[("ENVIRONMENT", "staging"), ("DEV_SKIP_AUTH", "1")])
            .expect("staging settings");
        assert!(!staging.dev_bypass_enabled());

        let dev_without_flag = settings_from(&[("ENVIRONMENT", "development")]).expect("dev");
        assert!(!dev_without_flag.dev_bypass_enabled());
    }

    #[cfg(not(feature = "dev-bypass"))]
    #[test]
    fn bypass_stays_off_when_not_compiled_in() {
        let dev = settings_from(&[("ENVIRONMENT", "development"), ("DEV_SKIP_AUTH", "true")])
            .expect("dev settings");
        assert!(dev.is_development());
        assert!(dev.dev_skip_auth);
        assert!(!dev.dev_bypass_enabled());
    }

    #[test]
    fn rejects_unknown_environment() {
        let err = settings_from(&[("ENVIRONMENT", "qa")]).expect_err("should reject");
        assert_eq!(err, ConfigError::InvalidEnvironment("qa".into()));
    }

    #[test]
    fn rejects_non_numeric_ttl() {
        let err = settings_from(&[("JWKS_CACHE_TTL", "soon")]).expect_err("should reject");
        assert!(matches!(err, ConfigError::InvalidNumber { key: "JWKS_CACHE_TTL", .. }));
    }

    #[test]
    fn issuer_and_jwks_url_follow_pool() {
        let settings = settings_from(&[
            ("AWS_REGION", "eu-west-1"),
            ("COGNITO_USER_POOL_ID", "eu-west-1_Pool"),
            ("COGNITO_APP_CLIENT_ID", "client"),
            ("JWKS_CACHE_TTL", "60"),
        ])
        .expect("settings");
        assert!(settings.provider_configured());
        assert_eq!(
            settings.issuer(),
            "https://cognito-idp.eu-west-1.amazonaws.com/eu-west-1_Pool"
        );
        assert_eq!(
            settings.jwks_url(),
            "https://cognito-idp.eu-west-1.amazonaws.com/eu-west-1_Pool/.well-known/jwks.json"
        );
        assert_eq!(settings.jwks_cache_ttl, Duration::from_secs(60));

        let mirrored = settings.with_jwks_url("http://127.0.0.1:9000/jwks");
        assert_eq!(mirrored.jwks_url(), "http://127.0.0.1:9000/jwks");
    }

    #[test]
    fn provider_needs_pool_and_client() {
        let settings = settings_from(&[("COGNITO_USER_POOL_ID", "pool")]).expect("settings");
        assert!(!settings.provider_configured());
    }
}
