use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::error::{AuthError, AuthResult};
use crate::extractors::{credentials_from_request, CurrentUser};
use crate::identity::{IdentityResolver, RequestCredentials, UserIdentity};
use crate::roles::Role;

/// Fixed set of roles allowed through a route. Empty means any active user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGuard {
    allowed: Arc<[Role]>,
}

impl RoleGuard {
    pub fn require<I>(roles: I) -> Self
    where
        I: IntoIterator<Item = Role>,
    {
        let mut allowed: Vec<Role> = roles.into_iter().collect();
        allowed.sort();
        allowed.dedup();
        Self {
            allowed: allowed.into(),
        }
    }

    /// Authentication only, no role restriction.
    pub fn authenticated() -> Self {
        Self::require(std::iter::empty())
    }

    pub fn allowed(&self) -> &[Role] {
        &self.allowed
    }

    pub fn allows(&self, role: Role) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&role)
    }

    pub fn authorize(&self, user: &UserIdentity) -> AuthResult<()> {
        if self.allows(user.role) {
            return Ok(());
        }
        warn!(user_id = %user.id, role = %user.role, allowed = ?self.allowed, "role_check_failed");
        Err(AuthError::Forbidden {
            allowed: self.allowed.to_vec(),
        })
    }

    pub async fn check(
        &self,
        resolver: &IdentityResolver,
        credentials: &RequestCredentials,
    ) -> AuthResult<UserIdentity> {
        let user = resolver.resolve(credentials).await?;
        self.authorize(&user)?;
        Ok(user)
    }
}

/// State for [`require_roles`]: the shared resolver plus one route group's guard.
#[derive(Clone)]
pub struct GuardState {
    resolver: Arc<IdentityResolver>,
    guard: RoleGuard,
}

impl GuardState {
    pub fn new(resolver: Arc<IdentityResolver>, guard: RoleGuard) -> Self {
        Self { resolver, guard }
    }

    pub fn guard(&self) -> &RoleGuard {
        &self.guard
    }
}

/// Middleware for `Router::route_layer`: resolves the caller, enforces the
/// guard and leaves a [`CurrentUser`] in the request extensions.
pub async fn require_roles(
    State(gate): State<GuardState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let existing = request.extensions().get::<CurrentUser>().cloned();
    let user = match existing {
        Some(CurrentUser(user)) => user,
        None => {
            let credentials = credentials_from_request(
                request.headers(),
                request.extensions(),
                gate.resolver.settings(),
            );
            gate.resolver.resolve(&credentials).await?
        }
    };

    gate.guard.authorize(&user)?;
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}
