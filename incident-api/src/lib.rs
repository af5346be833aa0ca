//! HTTP surface of the incident management backend's user endpoints.

pub mod api_error;
pub mod app_state;
pub mod handlers;
pub mod user_store;

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use common_auth::{require_roles, GuardState, Role, RoleGuard};

pub use api_error::{ApiError, ApiResult};
pub use app_state::AppState;
pub use user_store::{PgUserStore, UserPage, UserStore};

/// All routes with their guards, plus the dev override capture when compiled in and enabled.
pub fn build_router(state: AppState) -> Router {
    let resolver = state.resolver.clone();

    let admin_only = Router::new()
        .route("/api/v1/users", get(handlers::list_users))
        .route_layer(from_fn_with_state(
            GuardState::new(resolver.clone(), RoleGuard::require([Role::Admin])),
            require_roles,
        ));
    let signed_in = Router::new()
        .route("/api/v1/users/me", get(handlers::current_user))
        .route_layer(from_fn_with_state(
            GuardState::new(resolver.clone(), RoleGuard::authenticated()),
            require_roles,
        ));

    let router = Router::new()
        .route("/health", get(handlers::health))
        .merge(admin_only)
        .merge(signed_in)
        .with_state(state);
    #[cfg(feature = "dev-bypass")]
    let router = common_auth::dev_bypass::install(router, resolver.settings());
    router
}
