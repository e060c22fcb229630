//! crates/attendance_core/src/capture.rs
//!
//! The scanning path: scanned QR text in, attendance recorded or queued out.
//!
//! A scan is submitted directly while the server is reachable. If the device is
//! offline, or the direct submission does not get an answer, the claim goes to
//! the pending queue for the sync coordinator. Definitive rejections from the
//! server (unknown student, invalid input) are surfaced and never queued.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::domain::{
    AttendanceClaim, CanonicalAttendanceRecord, PendingRecord, QrToken, TokenPayload,
};
use crate::ports::{IngestionGateway, MarkDisposition, PendingQueue, PortError};
use crate::token::{parse_envelope, TokenCodec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Marked(CanonicalAttendanceRecord),
    Duplicate,
    Queued(PendingRecord),
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Invalid QR code")]
    InvalidToken,
    /// The device holds no decode secret and the server cannot be reached.
    #[error("QR code cannot be decoded while offline")]
    DecodeUnavailable,
    #[error("Invalid attendance claim: {0}")]
    InvalidInput(String),
    #[error("Attendance rejected: {0}")]
    Rejected(String),
    #[error("Local queue storage unavailable: {0}")]
    Storage(PortError),
}

pub struct ScanRecorder {
    queue: Arc<dyn PendingQueue>,
    gateway: Arc<dyn IngestionGateway>,
    monitor: Arc<ConnectivityMonitor>,
    local_codec: Option<TokenCodec>,
    operator_id: Option<String>,
    request_timeout: Duration,
}

impl ScanRecorder {
    pub fn new(
        queue: Arc<dyn PendingQueue>,
        gateway: Arc<dyn IngestionGateway>,
        monitor: Arc<ConnectivityMonitor>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            gateway,
            monitor,
            local_codec: None,
            operator_id: None,
            request_timeout,
        }
    }

    /// Makes this device a designated decode authority.
    pub fn with_local_codec(mut self, codec: TokenCodec) -> Self {
        self.local_codec = Some(codec);
        self
    }

    /// Identity used for session-broadcast tokens that carry no student.
    pub fn with_operator_id(mut self, operator_id: impl Into<String>) -> Self {
        self.operator_id = Some(operator_id.into());
        self
    }

    /// Handles one scanned QR text end to end.
    pub async fn capture_scan(&self, scanned: &str) -> Result<CaptureOutcome, CaptureError> {
        let token = parse_envelope(scanned).map_err(|_| CaptureError::InvalidToken)?;
        let payload = self.open_token(&token).await?;
        let claim = self.claim_from_payload(&payload)?;
        self.record(claim).await
    }

    async fn open_token(&self, token: &QrToken) -> Result<TokenPayload, CaptureError> {
        if let Some(codec) = &self.local_codec {
            return codec.decode(token).map_err(|_| CaptureError::InvalidToken);
        }
        if !self.monitor.is_online() {
            return Err(CaptureError::DecodeUnavailable);
        }
        match tokio::time::timeout(self.request_timeout, self.gateway.decode_token(token)).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(PortError::Rejected(_))) => Err(CaptureError::InvalidToken),
            Ok(Err(e)) => {
                warn!("Decode request failed: {}", e);
                Err(CaptureError::DecodeUnavailable)
            }
            Err(_) => {
                warn!("Decode request timed out");
                Err(CaptureError::DecodeUnavailable)
            }
        }
    }

    fn claim_from_payload(&self, payload: &TokenPayload) -> Result<AttendanceClaim, CaptureError> {
        let student_id = payload
            .student_id
            .clone()
            .or_else(|| self.operator_id.clone())
            .unwrap_or_default();
        AttendanceClaim::new(student_id, payload.session_id.clone(), payload.issued_at)
            .map_err(|e| CaptureError::InvalidInput(e.to_string()))
    }

    /// Submits a claim directly when online, otherwise (or on no answer) queues it.
    pub async fn record(&self, claim: AttendanceClaim) -> Result<CaptureOutcome, CaptureError> {
        if self.monitor.is_online() {
            match tokio::time::timeout(self.request_timeout, self.gateway.mark_single(&claim))
                .await
            {
                Ok(Ok(MarkDisposition::Confirmed(record))) => {
                    return Ok(CaptureOutcome::Marked(record))
                }
                Ok(Ok(MarkDisposition::Duplicate)) => return Ok(CaptureOutcome::Duplicate),
                Ok(Ok(MarkDisposition::Rejected(reason))) => {
                    return Err(CaptureError::Rejected(reason))
                }
                Ok(Err(e)) => warn!("Direct submission failed, queueing claim: {}", e),
                Err(_) => warn!("Direct submission timed out, queueing claim"),
            }
        }

        let record = self
            .queue
            .enqueue(&claim)
            .await
            .map_err(CaptureError::Storage)?;
        info!(
            local_id = record.local_id,
            student_id = %claim.student_id(),
            session_id = %claim.session_id(),
            "Claim queued for sync"
        );
        Ok(CaptureOutcome::Queued(record))
    }
}
