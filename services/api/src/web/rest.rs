//! services/api/src/web/rest.rs
//!
//! The master definition for the OpenAPI specification and the health probe.

use crate::web::{attendance, qr};
use attendance_core::domain::{CanonicalAttendanceRecord, QrToken, TokenPayload};
use attendance_core::wire::{
    AttendanceLog, BatchOutcome, DecodeTokenRequest, DecodeTokenResponse, ErrorBody, ErrorCode,
    FailedLog, GenerateTokenRequest, GenerateTokenResponse, MarkRequest, MarkResponse,
    SyncRequest, SyncResponse, format_instant,
};
use axum::response::Json;
use chrono::Utc;
use serde::Serialize;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        attendance::mark_handler,
        attendance::sync_handler,
        attendance::list_handler,
        qr::generate_handler,
        qr::decode_handler,
    ),
    components(
        schemas(
            HealthResponse,
            CanonicalAttendanceRecord,
            QrToken,
            TokenPayload,
            AttendanceLog,
            SyncRequest,
            SyncResponse,
            BatchOutcome,
            FailedLog,
            MarkRequest,
            MarkResponse,
            GenerateTokenRequest,
            GenerateTokenResponse,
            DecodeTokenRequest,
            DecodeTokenResponse,
            ErrorBody,
            ErrorCode,
            attendance::ListResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Attendance Sync API", description = "Ingestion, deduplication and QR tokens for offline-capable attendance scanners.")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

//=========================================================================================
// Health
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// Liveness probe. Needs no credentials.
#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Server is reachable", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        timestamp: format_instant(Utc::now()),
    })
}
