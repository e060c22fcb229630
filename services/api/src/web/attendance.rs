//! services/api/src/web/attendance.rs
//!
//! Axum handlers for attendance ingestion: single marks, batch sync from
//! scanners, and listing canonical records.

use crate::error::ApiFailure;
use crate::web::extract::{ApiJson, ApiQuery};
use crate::web::state::AppState;
use attendance_core::domain::{Caller, CanonicalAttendanceRecord};
use attendance_core::ingestion::{IngestError, Outcome};
use attendance_core::ports::RecordQuery;
use attendance_core::wire::{AttendanceLog, MarkRequest, MarkResponse, SyncRequest, SyncResponse};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 500;

/// Mark attendance for a single claim.
#[utoipa::path(
    post,
    path = "/api/attendance/mark",
    request_body = MarkRequest,
    responses(
        (status = 201, description = "Attendance recorded", body = MarkResponse),
        (status = 400, description = "Missing fields or duplicate within the dedup window", body = attendance_core::wire::ErrorBody),
        (status = 404, description = "Student not found", body = attendance_core::wire::ErrorBody),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = []))
)]
pub async fn mark_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    ApiJson(req): ApiJson<MarkRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let log = AttendanceLog::from(req);
    match state.ingestion.mark_single(&log).await {
        Ok(Outcome::Confirmed(record)) => {
            info!(operator = %caller.operator, record_id = %record.id, "Single mark confirmed");
            Ok((
                StatusCode::CREATED,
                Json(MarkResponse {
                    message: "Attendance marked successfully".to_string(),
                    attendance: record,
                }),
            ))
        }
        Ok(Outcome::Duplicate) => Err(ApiFailure::duplicate()),
        Err(IngestError::InvalidInput(message)) => Err(ApiFailure::invalid_input(message)),
        Err(IngestError::NotFound) => Err(ApiFailure::not_found("Student not found")),
        Err(IngestError::Store(e)) => {
            error!("Failed to mark attendance: {:?}", e);
            Err(ApiFailure::internal("Failed to mark attendance"))
        }
    }
}

/// Ingest a batch of attendance logs captured offline.
///
/// Every log is resolved independently; inspect the three result buckets.
#[utoipa::path(
    post,
    path = "/api/attendance/sync",
    request_body = SyncRequest,
    responses(
        (status = 200, description = "Per-log results", body = SyncResponse),
        (status = 400, description = "Empty batch", body = attendance_core::wire::ErrorBody),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = []))
)]
pub async fn sync_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    ApiJson(req): ApiJson<SyncRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    if req.logs.is_empty() {
        return Err(ApiFailure::invalid_input("Logs array is required"));
    }

    let submitted = req.logs.len();
    let results = state.ingestion.mark_batch(req.logs).await;
    info!(
        operator = %caller.operator,
        submitted,
        confirmed = results.confirmed.len(),
        duplicates = results.duplicates.len(),
        failed = results.failed.len(),
        "Batch sync processed"
    );

    Ok(Json(SyncResponse {
        message: format!("Synced {} records", results.confirmed.len()),
        results,
    }))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub student_id: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct ListResponse {
    pub attendance: Vec<CanonicalAttendanceRecord>,
    pub total: i64,
    pub limit: i64,
    pub skip: i64,
}

/// List canonical attendance records, newest first.
#[utoipa::path(
    get,
    path = "/api/attendance",
    params(ListParams),
    responses(
        (status = 200, description = "A page of records", body = ListResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = []))
)]
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<impl IntoResponse, ApiFailure> {
    let query = RecordQuery {
        student_id: params.student_id.filter(|s| !s.is_empty()),
        session_id: params.session_id.filter(|s| !s.is_empty()),
        limit: params
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT),
        skip: params.skip.unwrap_or(0).max(0),
    };

    let (attendance, total) = state.store.list_records(&query).await.map_err(|e| {
        error!("Failed to list attendance: {:?}", e);
        ApiFailure::internal("Failed to fetch attendance")
    })?;

    Ok(Json(ListResponse {
        attendance,
        total,
        limit: query.limit,
        skip: query.skip,
    }))
}
