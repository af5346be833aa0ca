use std::env;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use common_auth::{AuthSettings, IdentityResolver};
use incident_api::{build_router, AppState, PgUserStore};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn cors_layer(settings: &AuthSettings) -> CorsLayer {
    let origins = if settings.is_development() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        )
    };

    #[allow(unused_mut)]
    let mut headers: Vec<HeaderName> = vec![ACCEPT, CONTENT_TYPE, AUTHORIZATION];
    #[cfg(feature = "dev-bypass")]
    headers.push(HeaderName::from_static(common_auth::DEV_USER_HEADER));

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers(headers)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = AuthSettings::from_env().context("invalid auth configuration")?;

    let default_filter = if settings.is_development() { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect_lazy(&database_url)
        .context("invalid DATABASE_URL")?;
    let users = Arc::new(PgUserStore::new(db));

    let cors = cors_layer(&settings);
    let resolver = Arc::new(
        IdentityResolver::from_settings(settings, users.clone())
            .context("failed to build identity resolver")?,
    );

    if resolver.settings().provider_configured() {
        match resolver.key_cache().refresh().await {
            Ok(keys) => info!(count = keys.len(), "signing keys loaded"),
            Err(err) => warn!(error = %err, "signing key warm-up failed; retrying on first request"),
        }
    } else if !resolver.settings().dev_bypass_enabled() {
        warn!("COGNITO_USER_POOL_ID / COGNITO_APP_CLIENT_ID unset; bearer tokens will be refused");
    }

    let app = build_router(AppState::new(resolver, users)).layer(cors);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let ip: IpAddr = host.parse()?;
    let addr = SocketAddr::from((ip, port));

    info!(%addr, "starting incident-api");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
