//! Router-level tests for the attendance API, run against in-memory ports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use api_lib::web::{build_router, state::AppState};
use async_trait::async_trait;
use attendance_core::domain::{Caller, CallerRole, CanonicalAttendanceRecord};
use attendance_core::ingestion::IngestionService;
use attendance_core::ports::{
    AccessService, AttendanceStore, InsertOutcome, PortError, PortResult, RecordQuery,
    RosterService,
};
use attendance_core::token::TokenCodec;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "admin-token";
const SCANNER_TOKEN: &str = "scanner-token";

//=========================================================================================
// In-memory Ports
//=========================================================================================

#[derive(Default)]
struct MemoryBackend {
    records: Mutex<Vec<CanonicalAttendanceRecord>>,
    students: Vec<String>,
}

#[async_trait]
impl AttendanceStore for MemoryBackend {
    async fn find_in_window(
        &self,
        student_id: &str,
        session_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PortResult<Option<CanonicalAttendanceRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| {
                r.student_id == student_id
                    && r.session_id == session_id
                    && r.timestamp >= from
                    && r.timestamp <= to
            })
            .cloned())
    }

    async fn insert_record(
        &self,
        record: &CanonicalAttendanceRecord,
        window: Duration,
    ) -> PortResult<InsertOutcome> {
        let mut records = self.records.lock().unwrap();
        let taken = records.iter().any(|r| {
            r.student_id == record.student_id
                && r.session_id == record.session_id
                && (r.timestamp - record.timestamp).abs() <= window
        });
        if taken {
            return Ok(InsertOutcome::Conflict);
        }
        records.push(record.clone());
        Ok(InsertOutcome::Inserted(record.clone()))
    }

    async fn list_records(
        &self,
        query: &RecordQuery,
    ) -> PortResult<(Vec<CanonicalAttendanceRecord>, i64)> {
        let mut matching: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .filter(|r| query.student_id.as_ref().map_or(true, |s| &r.student_id == s))
            .filter(|r| query.session_id.as_ref().map_or(true, |s| &r.session_id == s))
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(query.skip as usize)
            .take(query.limit as usize)
            .collect();
        Ok((page, total))
    }
}

#[async_trait]
impl RosterService for MemoryBackend {
    async fn student_exists(&self, student_id: &str) -> PortResult<bool> {
        Ok(self.students.iter().any(|s| s == student_id))
    }
}

struct StaticAccess(HashMap<&'static str, Caller>);

#[async_trait]
impl AccessService for StaticAccess {
    async fn authenticate(&self, bearer_token: &str) -> PortResult<Caller> {
        self.0
            .get(bearer_token)
            .cloned()
            .ok_or(PortError::Unauthorized)
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn app() -> Router {
    let backend = Arc::new(MemoryBackend {
        records: Mutex::new(Vec::new()),
        students: vec!["stu-1".to_string(), "stu-2".to_string()],
    });
    let access = StaticAccess(HashMap::from([
        (
            ADMIN_TOKEN,
            Caller {
                operator: "registrar".to_string(),
                role: CallerRole::Admin,
            },
        ),
        (
            SCANNER_TOKEN,
            Caller {
                operator: "gate-a".to_string(),
                role: CallerRole::Scanner,
            },
        ),
    ]));
    let state = Arc::new(AppState {
        ingestion: Arc::new(IngestionService::new(
            backend.clone(),
            backend.clone(),
            Duration::seconds(60),
        )),
        store: backend.clone(),
        roster: backend,
        access: Arc::new(access),
        codec: Arc::new(TokenCodec::with_cost("test-secret", 4).unwrap()),
    });
    build_router(state)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Value,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = if method == "GET" {
        builder.body(Body::empty()).unwrap()
    } else {
        builder.body(Body::from(body.to_string())).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

//=========================================================================================
// Tests
//=========================================================================================

#[tokio::test]
async fn health_needs_no_token() {
    let app = app();
    let (status, body) = send(&app, "GET", "/api/health", None, Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn protected_routes_require_a_known_token() {
    let app = app();
    let payload = json!({ "studentId": "stu-1", "sessionId": "s1" });

    let (status, body) = send(&app, "POST", "/api/attendance/mark", None, payload.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let (status, _) = send(&app, "POST", "/api/attendance/mark", Some("bogus"), payload).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn mark_then_repeat_within_window_is_duplicate() {
    let app = app();
    let first = json!({
        "studentId": "stu-1",
        "sessionId": "s1",
        "timestamp": "2024-03-01T09:00:00.000Z"
    });
    let second = json!({
        "studentId": "stu-1",
        "sessionId": "s1",
        "timestamp": "2024-03-01T09:00:59.000Z"
    });

    let (status, body) = send(&app, "POST", "/api/attendance/mark", Some(SCANNER_TOKEN), first)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "Attendance marked successfully");
    assert_eq!(body["attendance"]["studentId"], "stu-1");

    let (status, body) = send(&app, "POST", "/api/attendance/mark", Some(SCANNER_TOKEN), second)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "duplicate");
}

#[tokio::test]
async fn mark_rejects_missing_fields_and_unknown_students() {
    let app = app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/attendance/mark",
        Some(SCANNER_TOKEN),
        json!({ "studentId": "stu-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");

    let (status, body) = send(
        &app,
        "POST",
        "/api/attendance/mark",
        Some(SCANNER_TOKEN),
        json!({ "studentId": "ghost", "sessionId": "s1" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn unparseable_requests_carry_an_error_code() {
    let app = app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/attendance/mark",
        Some(SCANNER_TOKEN),
        json!({ "studentId": 5, "sessionId": "s1" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");
    assert!(body["error"].as_str().is_some());

    let (status, body) = send(
        &app,
        "POST",
        "/api/attendance/sync",
        Some(SCANNER_TOKEN),
        json!({ "logs": "not-a-list" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");

    let (status, body) = send(
        &app,
        "GET",
        "/api/attendance?limit=abc",
        Some(ADMIN_TOKEN),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test]
async fn sync_reports_each_log_independently() {
    let app = app();
    let logs = json!({ "logs": [
        { "studentId": "stu-1", "sessionId": "s1", "time": "2024-03-01T09:00:00.000Z" },
        { "studentId": "stu-1", "sessionId": "s1", "time": "2024-03-01T09:00:30.000Z" },
        { "studentId": "stu-2", "sessionId": "s1", "time": "2024-03-01T09:00:10.000Z" },
        { "studentId": "ghost", "sessionId": "s1", "time": "2024-03-01T09:00:10.000Z" },
        { "sessionId": "s1" }
    ]});

    let (status, body) = send(&app, "POST", "/api/attendance/sync", Some(SCANNER_TOKEN), logs)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Synced 2 records");
    assert_eq!(body["results"]["success"].as_array().unwrap().len(), 2);
    assert_eq!(body["results"]["duplicates"].as_array().unwrap().len(), 1);
    assert_eq!(body["results"]["failed"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn sync_rejects_an_empty_batch() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/attendance/sync",
        Some(SCANNER_TOKEN),
        json!({ "logs": [] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Logs array is required");
}

#[tokio::test]
async fn list_returns_newest_first_with_total() {
    let app = app();
    for (student, time) in [
        ("stu-1", "2024-03-01T09:00:00.000Z"),
        ("stu-2", "2024-03-01T09:05:00.000Z"),
        ("stu-1", "2024-03-01T10:00:00.000Z"),
    ] {
        let (status, _) = send(
            &app,
            "POST",
            "/api/attendance/mark",
            Some(SCANNER_TOKEN),
            json!({ "studentId": student, "sessionId": "s1", "timestamp": time }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(
        &app,
        "GET",
        "/api/attendance?studentId=stu-1&limit=1",
        Some(SCANNER_TOKEN),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    let page = body["attendance"].as_array().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["timestamp"], "2024-03-01T10:00:00Z");
}

#[tokio::test]
async fn generate_is_admin_only_and_decodes_back() {
    let app = app();
    let request = json!({ "studentId": "stu-1", "sessionId": "cs101" });

    let (status, body) = send(
        &app,
        "POST",
        "/api/qr/generate",
        Some(SCANNER_TOKEN),
        request.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, issued) = send(&app, "POST", "/api/qr/generate", Some(ADMIN_TOKEN), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(issued["data"]["sessionId"], "cs101");
    let qr_text: Value = serde_json::from_str(issued["qrText"].as_str().unwrap()).unwrap();
    assert_eq!(qr_text, issued["encrypted"]);

    let (status, decoded) = send(
        &app,
        "POST",
        "/api/qr/decode",
        Some(SCANNER_TOKEN),
        json!({ "encrypted": issued["encrypted"]["data"], "iv": issued["encrypted"]["iv"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decoded["data"], issued["data"]);
}

#[tokio::test]
async fn generate_validates_its_input() {
    let app = app();

    let (status, body) = send(&app, "POST", "/api/qr/generate", Some(ADMIN_TOKEN), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");

    let (status, _) = send(
        &app,
        "POST",
        "/api/qr/generate",
        Some(ADMIN_TOKEN),
        json!({ "studentId": "ghost" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        "POST",
        "/api/qr/generate",
        Some(ADMIN_TOKEN),
        json!({ "studentId": "stu-2" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["sessionId"]
        .as_str()
        .unwrap()
        .starts_with("session-"));
}

#[tokio::test]
async fn decode_distinguishes_missing_fields_from_bad_tokens() {
    let app = app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/qr/decode",
        Some(SCANNER_TOKEN),
        json!({ "encrypted": "abcd" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");

    let (status, body) = send(
        &app,
        "POST",
        "/api/qr/decode",
        Some(SCANNER_TOKEN),
        json!({ "encrypted": "abcd", "iv": "00112233445566778899aabb" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_token");
    assert_eq!(body["error"], "Invalid QR code");
}
