//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use attendance_core::ports::PortError;
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::ApiFailure;
use crate::web::state::AppState;

/// Middleware that validates the `Authorization: Bearer` token and resolves the caller.
///
/// If valid, inserts the `Caller` into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        return ApiFailure::unauthorized().into_response();
    };

    let caller = match state.access.authenticate(token).await {
        Ok(caller) => caller,
        Err(PortError::Unauthorized) => {
            warn!("Rejected request with an unknown bearer token");
            return ApiFailure::unauthorized().into_response();
        }
        Err(e) => {
            error!("Failed to validate bearer token: {:?}", e);
            return ApiFailure::internal("Failed to authenticate request").into_response();
        }
    };

    req.extensions_mut().insert(caller);
    next.run(req).await
}
