pub mod capture;
pub mod connectivity;
pub mod domain;
pub mod ingestion;
pub mod ports;
pub mod sync;
pub mod token;
pub mod wire;

#[cfg(test)]
mod test_support;

pub use capture::{CaptureError, CaptureOutcome, ScanRecorder};
pub use connectivity::{ConnectivityMonitor, Transition};
pub use domain::{
    AttendanceClaim, Caller, CallerRole, CanonicalAttendanceRecord, ClaimError, PendingRecord,
    QrToken, TokenPayload,
};
pub use ingestion::{IngestError, IngestionService, Outcome};
pub use ports::{
    AccessService, AttendanceStore, ConnectivityProbe, IngestionGateway, InsertOutcome,
    MarkDisposition, PendingQueue, PortError, PortResult, RecordQuery, RosterService,
};
pub use sync::{CycleReport, SyncCoordinator, SyncError, SyncState, SyncSummary};
pub use token::{TokenCodec, TokenError};
