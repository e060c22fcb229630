//! crates/attendance_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the sync engine.
//! These traits form the boundary of the hexagonal architecture: the engine only
//! talks to storage, the roster, the network and the reachability probe through them.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::{
    AttendanceClaim, Caller, CanonicalAttendanceRecord, PendingRecord, QrToken, TokenPayload,
};
use crate::wire::{AttendanceLog, BatchOutcome};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    /// The remote side could not be reached or did not answer in time.
    #[error("Transport failure: {0}")]
    Transport(String),
    /// The remote side answered and refused the request.
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Server-side Ports
//=========================================================================================

/// Result of trying to persist a canonical record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(CanonicalAttendanceRecord),
    /// A record for the same pair already exists within the window.
    Conflict,
}

/// Filter for listing canonical records, newest first.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub student_id: Option<String>,
    pub session_id: Option<String>,
    pub limit: i64,
    pub skip: i64,
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Returns any record for the pair whose timestamp lies in `[from, to]`.
    async fn find_in_window(
        &self,
        student_id: &str,
        session_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PortResult<Option<CanonicalAttendanceRecord>>;

    /// Inserts a record unless another record for the same pair lies within
    /// `window` of its timestamp.
    ///
    /// The window check and the insert must be atomic with respect to other
    /// inserts for the pair. A hit is `InsertOutcome::Conflict`, never an error.
    async fn insert_record(
        &self,
        record: &CanonicalAttendanceRecord,
        window: Duration,
    ) -> PortResult<InsertOutcome>;

    async fn list_records(
        &self,
        query: &RecordQuery,
    ) -> PortResult<(Vec<CanonicalAttendanceRecord>, i64)>;
}

#[async_trait]
pub trait RosterService: Send + Sync {
    /// Confirms that the student exists in the roster.
    async fn student_exists(&self, student_id: &str) -> PortResult<bool>;
}

#[async_trait]
pub trait AccessService: Send + Sync {
    /// Resolves a bearer token to its caller, or `PortError::Unauthorized`.
    async fn authenticate(&self, bearer_token: &str) -> PortResult<Caller>;
}

//=========================================================================================
// Client-side Ports
//=========================================================================================

/// Durable, device-local store of claims awaiting confirmation.
///
/// Implementations never drop an unsynced record and never reject a claim because
/// it looks like a duplicate.
#[async_trait]
pub trait PendingQueue: Send + Sync {
    async fn enqueue(&self, claim: &AttendanceClaim) -> PortResult<PendingRecord>;

    /// All unsynced records in insertion order.
    async fn list_unsynced(&self) -> PortResult<Vec<PendingRecord>>;

    /// Idempotent: absent or already-synced ids are a no-op.
    async fn mark_synced(&self, local_id: i64) -> PortResult<()>;

    /// Bumps the attempt counter of an unsynced record and stores the server's reason.
    async fn record_failure(&self, local_id: i64, reason: &str) -> PortResult<()>;

    /// Deletes every synced record, returning how many were removed.
    async fn sweep_synced(&self) -> PortResult<u64>;

    async fn pending_count(&self) -> PortResult<u64>;
}

/// Server response to a single direct submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkDisposition {
    Confirmed(CanonicalAttendanceRecord),
    Duplicate,
    /// Rejected for good (unknown student, invalid input). Not retried.
    Rejected(String),
}

/// The client's view of the ingestion endpoints.
#[async_trait]
pub trait IngestionGateway: Send + Sync {
    /// Submits a batch. Transport problems are `PortError::Transport`.
    async fn submit_batch(&self, logs: &[AttendanceLog]) -> PortResult<BatchOutcome>;

    async fn mark_single(&self, claim: &AttendanceClaim) -> PortResult<MarkDisposition>;

    /// Asks the decode authority to open a token.
    /// A token the server cannot open is `PortError::Rejected`.
    async fn decode_token(&self, token: &QrToken) -> PortResult<TokenPayload>;
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Reports whether the server of record is reachable right now.
    async fn is_reachable(&self) -> bool;
}
