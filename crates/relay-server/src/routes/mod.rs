//! HTTP routing and shared server state.

pub mod auth;
pub mod channels;
pub mod ws;

use crate::auth::jwt::JwtManager;
use crate::config::Config;
use crate::metrics;
use crate::ratelimit::{self, RateLimiter};
use crate::store::{self, Db};
use anyhow::Result;
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use relay_core::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

/// Shared server state.
pub struct AppState {
    /// Database pool.
    pub db: Db,
    /// Server configuration.
    pub config: Config,
    /// Channel-id to broadcast-group registry, owned here for the process
    /// lifetime.
    pub registry: Registry,
    /// Token issuance/validation.
    pub jwt: JwtManager,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, db: Db) -> Self {
        let jwt = JwtManager::new(&config.auth.jwt_secret, config.auth.token_expiry_hours);
        Self {
            db,
            config,
            registry: Registry::new(),
            jwt,
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let limiter = Arc::new(RateLimiter::new(state.config.rate_limit));
    let cors = cors_layer(&state.config);

    let credential_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route_layer(middleware::from_fn_with_state(limiter, ratelimit::limit));

    let api = Router::new()
        .merge(credential_routes)
        .route("/logout", post(auth::logout))
        .route(
            "/me",
            get(auth::me).put(auth::update_me).delete(auth::delete_me),
        )
        .route(
            "/channels",
            get(channels::list_owned).post(channels::create),
        )
        .route("/channels/joined", get(channels::list_joined))
        .route("/channels/search", get(channels::search))
        .route("/channels/:id/join", post(channels::join))
        .route("/channels/:id/members", get(channels::members))
        .route("/channels/:id", delete(channels::delete));

    Router::new()
        .nest("/api", api)
        .route("/ws/:id", get(ws::upgrade))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let db = store::connect(&config.database.url, config.database.max_connections).await?;

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config, db));
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;

    info!("Relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws/{{channel_id}}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors
        .origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::CONTENT_LENGTH])
        .allow_credentials(true)
}
