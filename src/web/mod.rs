pub mod config;
pub mod extract;
pub mod session;
pub mod sessions;
pub mod webhooks;

use crate::state::SharedState;
use axum::{routing::get, Router};
use tower_http::timeout::TimeoutLayer;

async fn health() -> &'static str {
    "OK"
}

pub fn routes(state: SharedState) -> Router {
    let timeout = TimeoutLayer::new(state.config.request_timeout);
    Router::new()
        .route("/health", get(health))
        .nest("/config", config::router(state.clone()))
        .nest("/sessions", sessions::router(state.clone()).layer(timeout))
        .nest("/webhooks", webhooks::router(state))
}
