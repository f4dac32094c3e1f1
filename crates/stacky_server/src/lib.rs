//! HTTP service behind the Stacky chat widget: `/api/reply` and `/api/debug/login`.
pub mod completion;
pub mod config;
pub mod error;
mod handlers;

use std::sync::Arc;

use axum::routing::post;
use axum::Router;

pub use config::{ConfigError, ServerConfig};
pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/reply",
            post(handlers::reply::reply).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/debug/login",
            post(handlers::debug_login::debug_login).fallback(handlers::method_not_allowed),
        )
        .with_state(state)
}
