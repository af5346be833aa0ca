use std::sync::Arc;

use axum::extract::FromRef;
use common_auth::{AuthSettings, IdentityResolver};

use crate::user_store::UserStore;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub(crate) resolver: Arc<IdentityResolver>,
    pub(crate) users: Arc<dyn UserStore>,
}

impl AppState {
    pub fn new(resolver: Arc<IdentityResolver>, users: Arc<dyn UserStore>) -> Self {
        Self { resolver, users }
    }

    pub fn settings(&self) -> &AuthSettings {
        self.resolver.settings()
    }
}

impl FromRef<AppState> for Arc<IdentityResolver> {
    fn from_ref(state: &AppState) -> Self {
        state.resolver.clone()
    }
}
