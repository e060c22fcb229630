pub mod attendance;
pub mod extract;
pub mod middleware;
pub mod qr;
pub mod rest;
pub mod state;

pub use middleware::require_auth;
pub use rest::health_handler;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use state::AppState;
use std::sync::Arc;

/// Builds the API router. Everything except the health probe sits behind the
/// bearer-token middleware.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/api/health", get(health_handler));

    let protected_routes = Router::new()
        .route("/api/attendance", get(attendance::list_handler))
        .route("/api/attendance/mark", post(attendance::mark_handler))
        .route("/api/attendance/sync", post(attendance::sync_handler))
        .route("/api/qr/generate", post(qr::generate_handler))
        .route("/api/qr/decode", post(qr::decode_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(app_state)
}
