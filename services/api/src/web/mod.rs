pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use middleware::require_user;
pub use rest::ApiDoc;
pub use state::AppState;
pub use ws_handler::ws_handler;

/// Builds the tracking routes. Every route requires a user identity.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/tracking/consent",
            get(rest::get_consent_handler).put(rest::put_consent_handler),
        )
        .route("/tracking/initialize", post(rest::initialize_handler))
        .route("/tracking/status", get(rest::status_handler))
        .route("/tracking/location", get(rest::location_handler))
        .route("/tracking/logout", post(rest::logout_handler))
        .route("/tracking/peers", get(rest::peers_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn(require_user))
        .with_state(app_state)
}
