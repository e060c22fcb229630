//! crates/attendance_core/src/domain.rs
//!
//! Defines the core data structures that flow through the attendance pipeline,
//! from a scanned token to a canonical server record.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors raised when constructing an `AttendanceClaim`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    #[error("Student ID is required")]
    MissingStudentId,
    #[error("Session ID is required")]
    MissingSessionId,
}

/// An attendance assertion not yet confirmed by the canonical store.
///
/// A claim can only be built through [`AttendanceClaim::new`], so a value of this
/// type always carries a non-empty student and session. Timestamps are kept at
/// millisecond precision, which is what survives the JSON wire format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttendanceClaim {
    student_id: String,
    session_id: String,
    timestamp: DateTime<Utc>,
}

impl AttendanceClaim {
    pub fn new(
        student_id: impl Into<String>,
        session_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ClaimError> {
        let student_id = student_id.into().trim().to_string();
        let session_id = session_id.into().trim().to_string();
        if student_id.is_empty() {
            return Err(ClaimError::MissingStudentId);
        }
        if session_id.is_empty() {
            return Err(ClaimError::MissingSessionId);
        }
        Ok(Self {
            student_id,
            session_id,
            timestamp: timestamp.trunc_subsecs(3),
        })
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// A locally persisted claim awaiting confirmation from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub local_id: i64,
    pub claim: AttendanceClaim,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
    /// Number of cycles in which the server reported this record as failed.
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// The server's durable, deduplicated attendance fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct CanonicalAttendanceRecord {
    pub id: Uuid,
    pub student_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub confirmed_at: DateTime<Utc>,
}

impl CanonicalAttendanceRecord {
    /// Builds a fresh record for a claim received at `received_at`.
    pub fn from_claim(claim: &AttendanceClaim, received_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id: claim.student_id().to_string(),
            session_id: claim.session_id().to_string(),
            timestamp: claim.timestamp(),
            recorded_at: received_at,
            confirmed_at: received_at,
        }
    }
}

/// The encrypted envelope rendered into a QR image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct QrToken {
    /// Hex-encoded ciphertext.
    pub data: String,
    /// Hex-encoded IV, unique per encryption.
    pub iv: String,
}

/// The decoded contents of a `QrToken`.
///
/// `nonce` is per-issue randomness that only varies the ciphertext. It is never
/// key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    /// `None` marks a session broadcast; the scanner supplies the identity.
    pub student_id: Option<String>,
    pub session_id: String,
    #[serde(rename = "timestamp")]
    pub issued_at: DateTime<Utc>,
    pub nonce: String,
}

/// The caller behind a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub operator: String,
    pub role: CallerRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerRole {
    Admin,
    Scanner,
}

impl CallerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallerRole::Admin => "admin",
            CallerRole::Scanner => "scanner",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(CallerRole::Admin),
            "scanner" => Some(CallerRole::Scanner),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn claim_requires_student_and_session() {
        let now = Utc::now();
        assert_eq!(
            AttendanceClaim::new("  ", "s1", now),
            Err(ClaimError::MissingStudentId)
        );
        assert_eq!(
            AttendanceClaim::new("stu-1", "", now),
            Err(ClaimError::MissingSessionId)
        );
        assert!(AttendanceClaim::new("stu-1", "s1", now).is_ok());
    }

    #[test]
    fn claim_timestamp_is_truncated_to_millis() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let claim = AttendanceClaim::new("stu-1", "s1", ts).unwrap();
        assert_eq!(claim.timestamp().timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn token_payload_requires_the_nonce_field() {
        let json = concat!(
            r#"{"studentId":null,"sessionId":"session-1","#,
            r#""timestamp":"2024-03-01T09:00:00Z","nonce":"ab12"}"#
        );
        let payload: TokenPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.student_id, None);
        assert_eq!(payload.nonce, "ab12");

        let renamed = json.replace("\"nonce\"", "\"key\"");
        assert!(serde_json::from_str::<TokenPayload>(&renamed).is_err());
    }
}
