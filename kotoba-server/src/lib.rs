//! kotoba-server library - Japanese reading and review API
//!
//! Routes are grouped per area (auth, books, annotations, words, srs,
//! reading, health) and merged into one router sharing [`AppState`].

use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use kotoba_common::auth::TokenSigner;
use kotoba_common::config::ServerConfig;
use sqlx::SqlitePool;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod api;
pub mod db;
pub mod error;
pub mod extract;
pub mod scheduler;
pub mod text;

/// Multipart framing on top of the file bytes
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Resolved configuration
    pub config: Arc<ServerConfig>,
    /// Access token issuer / verifier
    pub tokens: TokenSigner,
    /// Server start, for uptime reporting
    pub startup_time: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(db: SqlitePool, config: ServerConfig, tokens: TokenSigner) -> Self {
        Self {
            db,
            config: Arc::new(config),
            tokens,
            startup_time: Instant::now(),
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    let body_limit = config.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES);

    let mut app = Router::new()
        .merge(api::health_routes())
        .merge(api::auth_routes())
        .merge(api::book_routes())
        .merge(api::annotation_routes())
        .merge(api::word_routes())
        .merge(api::srs_routes())
        .merge(api::reading_routes())
        .nest_service("/uploads", ServeDir::new(&config.upload_dir));

    if config.static_dir.is_dir() {
        info!("Serving static files from {}", config.static_dir.display());
        app = app.nest_service("/static", ServeDir::new(&config.static_dir));
    }

    app.layer(DefaultBodyLimit::max(
        usize::try_from(body_limit).unwrap_or(usize::MAX),
    ))
    .layer(TraceLayer::new_for_http())
    .layer(cors_layer(&config.cors_origins))
    .with_state(state)
}
