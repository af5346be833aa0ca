//! Development-only identity override.
//!
//! With `ENVIRONMENT=development` and `DEV_SKIP_AUTH=true`, [`install`] adds a
//! middleware that moves the `X-Dev-User-ID` header into a [`DevSubject`]
//! request extension. Nothing else reads the header, and the resolver ignores
//! the extension unless the bypass is enabled, so the value lives and dies
//! with its request.

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use tracing::warn;

use crate::config::AuthSettings;

pub const DEV_USER_HEADER: &str = "x-dev-user-id";

/// Provider subject to authenticate as, captured from the override header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevSubject(pub String);

pub async fn capture_dev_subject(mut request: Request, next: Next) -> Response {
    let subject = request
        .headers_mut()
        .remove(DEV_USER_HEADER)
        .and_then(|value| value.to_str().ok().map(|raw| raw.trim().to_owned()))
        .filter(|raw| !raw.is_empty());

    if let Some(subject) = subject {
        request.extensions_mut().insert(DevSubject(subject));
    }
    next.run(request).await
}

/// Attach the capture middleware when the bypass is enabled; otherwise return `router` untouched.
pub fn install<S>(router: Router<S>, settings: &AuthSettings) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    if !settings.dev_bypass_enabled() {
        return router;
    }

    warn!(
        environment = %settings.environment,
        "DEV_SKIP_AUTH=true: bearer token verification is DISABLED; never enable outside development"
    );
    router.layer(middleware::from_fn(capture_dev_subject))
}
