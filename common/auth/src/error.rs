use axum::http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::roles::Role;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not authenticated")]
    Unauthenticated,
    #[error("requires one of roles: {}", join_roles(.allowed))]
    Forbidden { allowed: Vec<Role> },
    #[error("authentication service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("no signing key for kid '{0}'")]
    UnknownKey(String),
    #[error("token verification failed: {0}")]
    VerificationFailed(String),
    #[error("token has expired")]
    Expired,
    #[error("unexpected token issuer '{0}'")]
    WrongIssuer(String),
    #[error("expected access token, got token_use '{0}'")]
    WrongTokenUse(String),
    #[error("dev auth: no matching user found")]
    NoDevUser,
    #[error("failed to fetch JWKS: {0}")]
    JwksFetch(String),
    #[error("failed to parse JWKS response: {0}")]
    JwksDecode(String),
    #[error("failed to parse decoding key for kid '{kid}': {reason}")]
    KeyParse { kid: String, reason: String },
}

/// Storage failure while looking up a user record.
#[derive(Debug, Error)]
#[error("user directory lookup failed: {0}")]
pub struct DirectoryError(pub String);

impl From<DirectoryError> for AuthError {
    fn from(value: DirectoryError) -> Self {
        Self::ServiceUnavailable(value.to_string())
    }
}

fn join_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(Role::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AuthError::ServiceUnavailable(_)
            | AuthError::JwksFetch(_)
            | AuthError::JwksDecode(_)
            | AuthError::KeyParse { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Unauthenticated
            | AuthError::MalformedToken(_)
            | AuthError::UnknownKey(_)
            | AuthError::VerificationFailed(_)
            | AuthError::Expired
            | AuthError::WrongIssuer(_)
            | AuthError::WrongTokenUse(_)
            | AuthError::NoDevUser => StatusCode::UNAUTHORIZED,
        }
    }

    /// True for the token-verification sub-kinds that collapse to a generic 401.
    pub fn is_token_failure(&self) -> bool {
        matches!(
            self,
            AuthError::MalformedToken(_)
                | AuthError::UnknownKey(_)
                | AuthError::VerificationFailed(_)
                | AuthError::Expired
                | AuthError::WrongIssuer(_)
                | AuthError::WrongTokenUse(_)
        )
    }

    fn public_parts(&self) -> (&'static str, String) {
        match self {
            AuthError::Unauthenticated => ("AUTH_REQUIRED", "Not authenticated".to_string()),
            AuthError::NoDevUser => (
                "AUTH_DEV_USER",
                "Dev auth: no matching user found. Set X-Dev-User-ID header or create an admin user first."
                    .to_string(),
            ),
            AuthError::Forbidden { allowed } => (
                "AUTH_FORBIDDEN",
                format!("Requires one of roles: {}", join_roles(allowed)),
            ),
            AuthError::ServiceUnavailable(_)
            | AuthError::JwksFetch(_)
            | AuthError::JwksDecode(_)
            | AuthError::KeyParse { .. } => (
                "AUTH_UNAVAILABLE",
                "Authentication service unavailable".to_string(),
            ),
            _ => ("AUTH_TOKEN", "Could not validate credentials".to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "authentication dependency failure");
        } else {
            debug!(error = %self, status = status.as_u16(), "request rejected by auth layer");
        }

        let (code, message) = self.public_parts();
        let mut response = (status, Json(ErrorBody { code, message })).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
