//! crates/attendance_core/src/wire.rs
//!
//! The JSON contract between the scanner and the server of record. Both sides
//! use these types, so the field names here are the wire names.

use crate::domain::{AttendanceClaim, CanonicalAttendanceRecord, QrToken, TokenPayload};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

//=========================================================================================
// Attendance Submission
//=========================================================================================

/// One entry of a sync batch, exactly as the client sent it.
///
/// Fields are optional so that a malformed entry fails on its own instead of
/// rejecting the whole batch at deserialization time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct AttendanceLog {
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// ISO-8601 instant; the server clock is used when absent.
    #[serde(default)]
    pub time: Option<String>,
}

impl From<&AttendanceClaim> for AttendanceLog {
    fn from(claim: &AttendanceClaim) -> Self {
        Self {
            student_id: Some(claim.student_id().to_string()),
            session_id: Some(claim.session_id().to_string()),
            time: Some(format_instant(claim.timestamp())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SyncRequest {
    pub logs: Vec<AttendanceLog>,
}

/// A batch entry that could not be recorded, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FailedLog {
    pub log: AttendanceLog,
    pub error: String,
}

/// Per-claim results of a batch, split into three buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BatchOutcome {
    #[serde(rename = "success")]
    pub confirmed: Vec<CanonicalAttendanceRecord>,
    pub failed: Vec<FailedLog>,
    pub duplicates: Vec<AttendanceLog>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SyncResponse {
    pub message: String,
    pub results: BatchOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct MarkRequest {
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl From<&AttendanceClaim> for MarkRequest {
    fn from(claim: &AttendanceClaim) -> Self {
        Self {
            student_id: Some(claim.student_id().to_string()),
            session_id: Some(claim.session_id().to_string()),
            timestamp: Some(format_instant(claim.timestamp())),
        }
    }
}

impl From<MarkRequest> for AttendanceLog {
    fn from(req: MarkRequest) -> Self {
        Self {
            student_id: req.student_id,
            session_id: req.session_id,
            time: req.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MarkResponse {
    pub message: String,
    pub attendance: CanonicalAttendanceRecord,
}

//=========================================================================================
// Tokens
//=========================================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct GenerateTokenRequest {
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct GenerateTokenResponse {
    pub data: TokenPayload,
    pub encrypted: QrToken,
    /// The text to render into the QR image.
    pub qr_text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DecodeTokenRequest {
    #[serde(default)]
    pub encrypted: Option<String>,
    #[serde(default)]
    pub iv: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DecodeTokenResponse {
    pub data: TokenPayload,
}

//=========================================================================================
// Errors
//=========================================================================================

/// Machine-readable classification carried by every error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    Duplicate,
    InvalidToken,
    Unauthorized,
    Forbidden,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorCode,
}

/// Formats an instant the way it travels on the wire (RFC 3339, millisecond precision, `Z`).
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a wire instant. Accepts any RFC 3339 offset and normalizes to UTC.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_outcome_uses_wire_bucket_names() {
        let outcome = BatchOutcome {
            confirmed: vec![],
            failed: vec![FailedLog {
                log: AttendanceLog::default(),
                error: "Missing required fields".to_string(),
            }],
            duplicates: vec![],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("success").is_some());
        assert_eq!(json["failed"][0]["error"], "Missing required fields");
        assert!(json["failed"][0]["log"]["studentId"].is_null());
    }

    #[test]
    fn log_from_claim_carries_millisecond_instant() {
        let ts = parse_instant("2024-03-01T09:00:00.250+02:00").unwrap();
        let claim = AttendanceClaim::new("stu-1", "s1", ts).unwrap();
        let log = AttendanceLog::from(&claim);
        assert_eq!(log.time.as_deref(), Some("2024-03-01T07:00:00.250Z"));
        assert_eq!(parse_instant(log.time.as_deref().unwrap()), Some(ts));
    }

    #[test]
    fn missing_log_fields_deserialize_as_none() {
        let log: AttendanceLog = serde_json::from_str(r#"{"studentId":"stu-1"}"#).unwrap();
        assert_eq!(log.student_id.as_deref(), Some("stu-1"));
        assert!(log.session_id.is_none());
        assert!(log.time.is_none());
    }
}
