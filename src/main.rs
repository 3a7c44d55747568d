mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod store;
#[cfg(test)]
mod test_support;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::services::{AuthService, DbscService, FallbackIdentityStore};
use crate::store::SystemClock;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub dbsc: Arc<DbscService>,
    pub identities: Arc<FallbackIdentityStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dbsc_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting DBSC server...");

    // Load configuration
    let config = Config::load()?;
    tracing::info!("Configuration loaded");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = build_state(config).await?;

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn build_state(config: Config) -> anyhow::Result<AppState> {
    // Initialize database
    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;
    AuthService::ensure_bootstrap_user(&db, &config).await?;
    tracing::info!("Database initialized");

    let kv = store::build_store(config.store.backend, &db, Arc::new(SystemClock));
    tracing::info!("Using {} key-value store", kv.backend_name());

    let identities = Arc::new(FallbackIdentityStore::new(kv.clone(), config.fallback.max_age()));
    let dbsc = Arc::new(DbscService::new(kv, identities.clone(), &config));

    Ok(AppState {
        db,
        config: Arc::new(config),
        dbsc,
        identities,
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutting down");
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public_routes = Router::new()
        .route("/login", post(handlers::auth::login))
        .route("/logout", post(handlers::auth::logout))
        .route("/start-dbsc-flow", get(handlers::dbsc::start_dbsc_flow))
        .route("/register-dbsc-cookie", post(handlers::dbsc::register_dbsc_cookie))
        .route("/refresh-dbsc-cookie", post(handlers::dbsc::refresh_dbsc_cookie));

    // Routes that require a live bound cookie
    let bound_routes = Router::new()
        .route("/session", get(handlers::session::get_session))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::dbsc_session_middleware,
        ));

    Router::new()
        .nest("/api", public_routes.merge(bound_routes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
