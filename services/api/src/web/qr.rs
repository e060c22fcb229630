//! services/api/src/web/qr.rs
//!
//! Token issuance and the authoritative decode endpoint.

use crate::error::ApiFailure;
use crate::web::extract::ApiJson;
use crate::web::state::AppState;
use attendance_core::domain::{Caller, CallerRole, QrToken};
use attendance_core::token::issue_payload;
use attendance_core::wire::{
    DecodeTokenRequest, DecodeTokenResponse, GenerateTokenRequest, GenerateTokenResponse,
};
use axum::{
    extract::State,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Issue an encrypted QR token for a student, a session, or both.
#[utoipa::path(
    post,
    path = "/api/qr/generate",
    request_body = GenerateTokenRequest,
    responses(
        (status = 200, description = "Token issued", body = GenerateTokenResponse),
        (status = 400, description = "Neither studentId nor sessionId given", body = attendance_core::wire::ErrorBody),
        (status = 403, description = "Caller is not an admin", body = attendance_core::wire::ErrorBody),
        (status = 404, description = "Student not found", body = attendance_core::wire::ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    ApiJson(req): ApiJson<GenerateTokenRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    if caller.role != CallerRole::Admin {
        return Err(ApiFailure::forbidden());
    }

    let student_id = req
        .student_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let session_id = req
        .session_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if student_id.is_none() && session_id.is_none() {
        return Err(ApiFailure::invalid_input(
            "Student ID or Session ID is required",
        ));
    }

    if let Some(student_id) = &student_id {
        let exists = state.roster.student_exists(student_id).await.map_err(|e| {
            error!("Roster lookup failed: {:?}", e);
            ApiFailure::internal("Failed to generate QR code")
        })?;
        if !exists {
            return Err(ApiFailure::not_found("Student not found"));
        }
    }

    let payload = issue_payload(student_id, session_id, Utc::now());
    let encrypted = state.codec.encode(&payload).map_err(|e| {
        error!("Token encoding failed: {}", e);
        ApiFailure::internal("Failed to generate QR code")
    })?;
    let qr_text = serde_json::to_string(&encrypted).map_err(|e| {
        error!("Token envelope serialization failed: {}", e);
        ApiFailure::internal("Failed to generate QR code")
    })?;

    info!(
        operator = %caller.operator,
        session_id = %payload.session_id,
        broadcast = payload.student_id.is_none(),
        "QR token issued"
    );
    Ok(Json(GenerateTokenResponse {
        data: payload,
        encrypted,
        qr_text,
    }))
}

/// Decode an encrypted QR token.
#[utoipa::path(
    post,
    path = "/api/qr/decode",
    request_body = DecodeTokenRequest,
    responses(
        (status = 200, description = "Decoded payload", body = DecodeTokenResponse),
        (status = 400, description = "Missing fields or invalid token", body = attendance_core::wire::ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn decode_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<DecodeTokenRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let (data, iv) = match (req.encrypted, req.iv) {
        (Some(data), Some(iv)) if !data.is_empty() && !iv.is_empty() => (data, iv),
        _ => {
            return Err(ApiFailure::invalid_input(
                "Encrypted data and IV are required",
            ))
        }
    };

    let payload = state.codec.decode(&QrToken { data, iv }).map_err(|e| {
        debug!("Rejected QR token: {}", e);
        ApiFailure::invalid_token()
    })?;
    Ok(Json(DecodeTokenResponse { data: payload }))
}
