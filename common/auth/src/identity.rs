use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AuthSettings;
use crate::error::{AuthError, AuthResult, DirectoryError};
use crate::key_cache::SigningKeyCache;
use crate::roles::Role;
use crate::verifier::{peek_key_id, TokenVerifier};

/// Persisted user record, looked up by the provider subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: Uuid,
    pub external_subject: String,
    pub full_name: String,
    pub email: Option<String>,
    pub role: Role,
    pub responsible_province: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl UserIdentity {
    pub fn new(external_subject: impl Into<String>, full_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_subject: external_subject.into(),
            full_name: full_name.into(),
            email: None,
            role,
            responsible_province: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Read-only user lookups the auth layer needs from storage.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_subject(&self, subject: &str) -> Result<Option<UserIdentity>, DirectoryError>;

    /// Most recently created active ADMIN, if any.
    async fn find_any_active_admin(&self) -> Result<Option<UserIdentity>, DirectoryError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<Vec<UserIdentity>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I>(users: I) -> Self
    where
        I: IntoIterator<Item = UserIdentity>,
    {
        Self {
            users: Arc::new(RwLock::new(users.into_iter().collect())),
        }
    }

    pub fn insert(&self, user: UserIdentity) -> Result<(), DirectoryError> {
        let mut guard = self
            .users
            .write()
            .map_err(|_| DirectoryError("user directory lock poisoned".into()))?;
        guard.retain(|existing| existing.external_subject != user.external_subject);
        guard.push(user);
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Vec<UserIdentity>, DirectoryError> {
        self.users
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| DirectoryError("user directory lock poisoned".into()))
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user_by_subject(&self, subject: &str) -> Result<Option<UserIdentity>, DirectoryError> {
        Ok(self
            .snapshot()?
            .into_iter()
            .find(|user| user.external_subject == subject))
    }

    async fn find_any_active_admin(&self) -> Result<Option<UserIdentity>, DirectoryError> {
        Ok(self
            .snapshot()?
            .into_iter()
            .filter(|user| user.role == Role::Admin && user.is_active)
            .max_by_key(|user| user.created_at))
    }
}

/// Credentials presented by a single inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCredentials {
    pub bearer_token: Option<String>,
    /// Only populated by the development bypass channel.
    pub dev_subject: Option<String>,
}

impl RequestCredentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
            dev_subject: None,
        }
    }

    pub fn dev(subject: Option<String>) -> Self {
        Self {
            bearer_token: None,
            dev_subject: subject,
        }
    }
}

/// Maps request credentials to an active user record.
pub struct IdentityResolver {
    settings: Arc<AuthSettings>,
    keys: Arc<SigningKeyCache>,
    verifier: TokenVerifier,
    directory: Arc<dyn UserDirectory>,
}

impl IdentityResolver {
    pub fn new(
        settings: Arc<AuthSettings>,
        keys: Arc<SigningKeyCache>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        let verifier = TokenVerifier::from_settings(&settings);
        Self {
            settings,
            keys,
            verifier,
            directory,
        }
    }

    /// Builds the key cache (and JWKS fetcher) from `settings`.
    pub fn from_settings(settings: AuthSettings, directory: Arc<dyn UserDirectory>) -> AuthResult<Self> {
        let keys = SigningKeyCache::from_settings(&settings)?;
        Ok(Self::new(Arc::new(settings), Arc::new(keys), directory))
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn key_cache(&self) -> &Arc<SigningKeyCache> {
        &self.keys
    }

    pub async fn resolve(&self, credentials: &RequestCredentials) -> AuthResult<UserIdentity> {
        let user = if self.settings.dev_bypass_enabled() {
            self.resolve_dev(credentials.dev_subject.as_deref()).await?
        } else {
            self.resolve_token(credentials.bearer_token.as_deref()).await?
        };

        match user {
            Some(user) if user.is_active => Ok(user),
            Some(user) => {
                debug!(user_id = %user.id, "resolved user is inactive");
                Err(AuthError::Unauthenticated)
            }
            None => Err(AuthError::Unauthenticated),
        }
    }

    async fn resolve_dev(&self, subject: Option<&str>) -> AuthResult<Option<UserIdentity>> {
        let user = match subject {
            Some(subject) => {
                debug!(subject, "dev bypass: resolving override subject");
                self.directory.find_user_by_subject(subject).await?
            }
            None => {
                debug!("dev bypass: no override subject; falling back to newest active admin");
                self.directory.find_any_active_admin().await?
            }
        };

        match user {
            Some(user) => Ok(Some(user)),
            None => {
                warn!(subject = ?subject, "dev bypass: no matching user");
                Err(AuthError::NoDevUser)
            }
        }
    }

    async fn resolve_token(&self, token: Option<&str>) -> AuthResult<Option<UserIdentity>> {
        let token = token.ok_or(AuthError::Unauthenticated)?;

        if !self.settings.provider_configured() {
            return Err(AuthError::ServiceUnavailable(
                "identity provider is not configured".into(),
            ));
        }

        let keys = self.keys.keys_for(peek_key_id(token).as_deref()).await?;
        let claims = self.verifier.verify(token, &keys).map_err(|err| {
            debug!(error = %err, "bearer token rejected");
            err
        })?;

        Ok(self.directory.find_user_by_subject(&claims.subject).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use chrono::Duration as ChronoDuration;

    fn directory() -> (InMemoryUserDirectory, UserIdentity, UserIdentity) {
        let older_admin = UserIdentity::new("admin-old", "Old Admin", Role::Admin)
            .with_created_at(Utc::now() - ChronoDuration::days(30));
        let newer_admin = UserIdentity::new("admin-new", "New Admin", Role::Admin);
        let officer = UserIdentity::new("officer-1", "Officer", Role::Officer);
        let retired = UserIdentity::new("retired", "Retired Officer", Role::Officer).deactivated();
        let disabled_admin = UserIdentity::new("admin-disabled", "Disabled", Role::Admin)
            .with_created_at(Utc::now() + ChronoDuration::days(1))
            .deactivated();
        let dir = InMemoryUserDirectory::with_users([
            older_admin,
            newer_admin.clone(),
            officer.clone(),
            retired,
            disabled_admin,
        ]);
        (dir, newer_admin, officer)
    }

    fn resolver(environment: Environment, skip: bool, dir: InMemoryUserDirectory) -> IdentityResolver {
        let settings = AuthSettings::new(environment, "ap-southeast-7", "", "")
            .with_dev_skip_auth(skip);
        IdentityResolver::new(
            Arc::new(settings),
            Arc::new(SigningKeyCache::unconfigured()),
            Arc::new(dir),
        )
    }

    #[cfg(feature = "dev-bypass")]
    #[tokio::test]
    async fn dev_override_resolves_exact_user() {
        let (dir, _, officer) = directory();
        let resolver = resolver(Environment::Development, true, dir);

        let user = resolver
            .resolve(&RequestCredentials::dev(Some("officer-1".into())))
            .await
            .expect("override user");
        assert_eq!(user, officer);
    }

    #[cfg(feature = "dev-bypass")]
    #[tokio::test]
    async fn dev_without_override_uses_newest_active_admin() {
        let (dir, newest, _) = directory();
        let resolver = resolver(Environment::Development, true, dir);

        let user = resolver
            .resolve(&RequestCredentials::default())
            .await
            .expect("fallback admin");
        assert_eq!(user.external_subject, newest.external_subject);
    }

    #[cfg(feature = "dev-bypass")]
    #[tokio::test]
    async fn dev_without_any_admin_fails_with_no_dev_user() {
        let dir = InMemoryUserDirectory::with_users([UserIdentity::new("o", "Officer", Role::Officer)]);
        let resolver = resolver(Environment::Development, true, dir);

        let err = resolver
            .resolve(&RequestCredentials::default())
            .await
            .expect_err("no admin");
        assert!(matches!(err, AuthError::NoDevUser));

        let err = resolver
            .resolve(&RequestCredentials::dev(Some("nobody".into())))
            .await
            .expect_err("unknown override");
        assert!(matches!(err, AuthError::NoDevUser));
    }

    #[cfg(feature = "dev-bypass")]
    #[tokio::test]
    async fn dev_override_for_inactive_user_is_unauthenticated() {
        let (dir, _, _) = directory();
        let resolver = resolver(Environment::Development, true, dir);

        let err = resolver
            .resolve(&RequestCredentials::dev(Some("retired".into())))
            .await
            .expect_err("inactive");
        assert!(matches!(err, AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn production_ignores_dev_override() {
        let (dir, _, _) = directory();
        let resolver = resolver(Environment::Production, true, dir);

        let err = resolver
            .resolve(&RequestCredentials::dev(Some("officer-1".into())))
            .await
            .expect_err("needs a token");
        assert!(matches!(err, AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn production_without_provider_is_unavailable() {
        let (dir, _, _) = directory();
        let resolver = resolver(Environment::Production, false, dir);

        let err = resolver
            .resolve(&RequestCredentials::bearer("abc.def.ghi"))
            .await
            .expect_err("provider missing");
        assert!(matches!(err, AuthError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn in_memory_insert_replaces_same_subject() {
        let dir = InMemoryUserDirectory::new();
        dir.insert(UserIdentity::new("s", "First", Role::Officer)).unwrap();
        dir.insert(UserIdentity::new("s", "Second", Role::Dispatcher)).unwrap();

        let user = dir.find_user_by_subject("s").await.unwrap().unwrap();
        assert_eq!(user.full_name, "Second");
        assert_eq!(dir.snapshot().unwrap().len(), 1);
    }
}
