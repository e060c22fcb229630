//! crates/attendance_core/src/ingestion.rs
//!
//! Server-side ingestion of attendance claims with time-windowed duplicate
//! suppression.
//!
//! No two canonical records may exist for the same `(student, session)` pair with
//! timestamps within the dedup window of each other. The window lookup is a fast
//! path; the store's atomic check-and-insert is what settles concurrent inserts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::domain::{AttendanceClaim, CanonicalAttendanceRecord, ClaimError};
use crate::ports::{AttendanceStore, InsertOutcome, PortError, RosterService};
use crate::wire::{parse_instant, AttendanceLog, BatchOutcome, FailedLog};

pub const DEFAULT_DEDUP_WINDOW_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Student not found")]
    NotFound,
    #[error("Storage failure: {0}")]
    Store(#[from] PortError),
}

impl From<ClaimError> for IngestError {
    fn from(_: ClaimError) -> Self {
        IngestError::InvalidInput("Missing required fields".to_string())
    }
}

/// Disposition of a single accepted claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Confirmed(CanonicalAttendanceRecord),
    Duplicate,
}

/// The bucket a timestamp falls into for a store-level uniqueness backstop.
///
/// Buckets are as wide as the window, so two timestamps sharing a bucket are
/// always less than one window apart and therefore duplicates anyway. Claims in
/// neighbouring buckets can still be duplicates; only the window check catches those.
pub fn dedup_bucket(timestamp: DateTime<Utc>, window: Duration) -> i64 {
    timestamp
        .timestamp_millis()
        .div_euclid(window.num_milliseconds().max(1))
}

pub struct IngestionService {
    store: Arc<dyn AttendanceStore>,
    roster: Arc<dyn RosterService>,
    window: Duration,
}

impl IngestionService {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        roster: Arc<dyn RosterService>,
        window: Duration,
    ) -> Self {
        Self {
            store,
            roster,
            window,
        }
    }

    /// Turns a raw log into a claim. The server clock stands in for a missing time.
    pub fn claim_from_log(
        log: &AttendanceLog,
        now: DateTime<Utc>,
    ) -> Result<AttendanceClaim, IngestError> {
        let timestamp = match log.time.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(raw) => parse_instant(raw)
                .ok_or_else(|| IngestError::InvalidInput("Invalid timestamp".to_string()))?,
            None => now,
        };
        let claim = AttendanceClaim::new(
            log.student_id.clone().unwrap_or_default(),
            log.session_id.clone().unwrap_or_default(),
            timestamp,
        )?;
        Ok(claim)
    }

    /// Validates and records one raw submission.
    pub async fn mark_single(&self, log: &AttendanceLog) -> Result<Outcome, IngestError> {
        let claim = Self::claim_from_log(log, Utc::now())?;
        self.mark_claim(&claim).await
    }

    pub async fn mark_claim(&self, claim: &AttendanceClaim) -> Result<Outcome, IngestError> {
        if !self.roster.student_exists(claim.student_id()).await? {
            return Err(IngestError::NotFound);
        }

        let ts = claim.timestamp();
        let existing = self
            .store
            .find_in_window(
                claim.student_id(),
                claim.session_id(),
                ts - self.window,
                ts + self.window,
            )
            .await?;
        if let Some(existing) = existing {
            debug!(
                student_id = %claim.student_id(),
                session_id = %claim.session_id(),
                existing_id = %existing.id,
                "Claim falls inside the dedup window of an existing record"
            );
            return Ok(Outcome::Duplicate);
        }

        let record = CanonicalAttendanceRecord::from_claim(claim, Utc::now());
        match self
            .store
            .insert_record(&record, self.window)
            .await?
        {
            InsertOutcome::Inserted(record) => {
                info!(
                    record_id = %record.id,
                    student_id = %record.student_id,
                    session_id = %record.session_id,
                    "Attendance recorded"
                );
                Ok(Outcome::Confirmed(record))
            }
            InsertOutcome::Conflict => {
                debug!(
                    student_id = %claim.student_id(),
                    session_id = %claim.session_id(),
                    "Concurrent insert already recorded this event"
                );
                Ok(Outcome::Duplicate)
            }
        }
    }

    /// Applies `mark_single` to every log in order. One failing log never
    /// affects the others.
    pub async fn mark_batch(&self, logs: Vec<AttendanceLog>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for log in logs {
            match self.mark_single(&log).await {
                Ok(Outcome::Confirmed(record)) => outcome.confirmed.push(record),
                Ok(Outcome::Duplicate) => outcome.duplicates.push(log),
                Err(e) => {
                    if let IngestError::Store(ref port_err) = e {
                        warn!("Storage failure while ingesting a batch entry: {}", port_err);
                    }
                    outcome.failed.push(FailedLog {
                        log,
                        error: e.to_string(),
                    });
                }
            }
        }
        outcome
    }
}
