pub mod error;
mod handlers;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{delete, get},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::session::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;

use handlers::*;

/// Command typed into a new shell when the viewer does not pass `cmd`.
pub const DEFAULT_COMMAND: &str = "bash";

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub shutdown: ShutdownCoordinator,
    pub default_command: String,
}

impl AppState {
    pub fn new(sessions: SessionRegistry, shutdown: ShutdownCoordinator) -> Self {
        Self {
            sessions,
            shutdown,
            default_command: DEFAULT_COMMAND.to_string(),
        }
    }
}

/// Configuration for the HTTP/WS router.
///
/// Use `RouterConfig::default()` in tests for a setup without CORS.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Browser origins allowed to call the HTTP endpoints. Empty disables
    /// the CORS layer entirely.
    pub cors_origins: Vec<String>,
}

pub fn router(state: AppState, config: RouterConfig) -> Router {
    let router = Router::new()
        .route("/", get(ws_connect))
        .route("/health", get(health))
        .route("/sessions", get(session_list))
        .route("/sessions/{id}", delete(session_kill))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.cors_origins.is_empty() {
        router
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        router.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE]),
        )
    }
}
