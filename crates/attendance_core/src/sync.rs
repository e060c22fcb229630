//! crates/attendance_core/src/sync.rs
//!
//! The sync coordinator: drains the pending queue to the ingestion endpoint in
//! batches and retires what the server has accounted for.
//!
//! A cycle moves `Idle -> Syncing -> Idle`. At most one cycle runs at a time per
//! coordinator; a trigger that arrives mid-cycle is dropped, and the next tick
//! picks up whatever is left. Local records are only mutated after the server
//! has answered, so a transport failure or timeout leaves the queue as it was.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::domain::AttendanceClaim;
use crate::ports::{IngestionGateway, PendingQueue, PortError};
use crate::wire::{parse_instant, AttendanceLog, BatchOutcome};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
}

/// Counts for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub submitted: usize,
    pub confirmed: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Records the server response did not mention; they stay queued.
    pub unresolved: usize,
    pub swept: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleReport {
    /// The device is offline; nothing was touched.
    Skipped,
    /// Another cycle was already running.
    AlreadySyncing,
    /// The queue was empty.
    NoOp,
    /// The batch could not be delivered; the queue is untouched.
    Failed(String),
    Completed(SyncSummary),
}

/// A fatal cycle error: local storage is unusable.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Local queue storage unavailable: {0}")]
    Storage(#[from] PortError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Confirmed,
    Duplicate,
    Failed(String),
}

impl Resolution {
    fn rank(&self) -> u8 {
        match self {
            Resolution::Confirmed => 2,
            Resolution::Duplicate => 1,
            Resolution::Failed(_) => 0,
        }
    }
}

type ClaimKey = (String, String, i64);

fn claim_key(claim: &AttendanceClaim) -> ClaimKey {
    (
        claim.student_id().to_string(),
        claim.session_id().to_string(),
        claim.timestamp().timestamp_millis(),
    )
}

fn log_key(log: &AttendanceLog) -> Option<ClaimKey> {
    let time = parse_instant(log.time.as_deref()?)?;
    Some((
        log.student_id.clone()?,
        log.session_id.clone()?,
        time.timestamp_millis(),
    ))
}

/// Maps each claim in the server's answer to its disposition. When identical
/// claims land in different buckets, retirement wins over failure.
fn resolve(outcome: &BatchOutcome) -> HashMap<ClaimKey, Resolution> {
    let mut resolved: HashMap<ClaimKey, Resolution> = HashMap::new();
    let mut put = |key: ClaimKey, resolution: Resolution| {
        let outranked = resolved
            .get(&key)
            .is_some_and(|existing| existing.rank() >= resolution.rank());
        if !outranked {
            resolved.insert(key, resolution);
        }
    };

    for record in &outcome.confirmed {
        let key = (
            record.student_id.clone(),
            record.session_id.clone(),
            record.timestamp.timestamp_millis(),
        );
        put(key, Resolution::Confirmed);
    }
    for log in &outcome.duplicates {
        if let Some(key) = log_key(log) {
            put(key, Resolution::Duplicate);
        }
    }
    for failed in &outcome.failed {
        if let Some(key) = log_key(&failed.log) {
            put(key, Resolution::Failed(failed.error.clone()));
        }
    }
    resolved
}

/// Resets the in-progress flag however the cycle ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncCoordinator {
    queue: Arc<dyn PendingQueue>,
    gateway: Arc<dyn IngestionGateway>,
    monitor: Arc<ConnectivityMonitor>,
    request_timeout: Duration,
    syncing: AtomicBool,
}

impl SyncCoordinator {
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
            request_timeout,
            syncing: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SyncState {
        if self.syncing.load(Ordering::Acquire) {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// Runs one sync cycle.
    ///
    /// Only an unusable local queue is an error; everything else is reported in
    /// the `CycleReport` and retried by a later cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        if !self.monitor.is_online() {
            return Ok(CycleReport::Skipped);
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync cycle already in progress, ignoring trigger");
            return Ok(CycleReport::AlreadySyncing);
        }
        let _guard = CycleGuard(&self.syncing);

        let pending = self.queue.list_unsynced().await?;
        if pending.is_empty() {
            return Ok(CycleReport::NoOp);
        }

        let logs: Vec<AttendanceLog> = pending
            .iter()
            .map(|record| AttendanceLog::from(&record.claim))
            .collect();

        let outcome =
            match tokio::time::timeout(self.request_timeout, self.gateway.submit_batch(&logs)).await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    warn!("Sync batch of {} records not delivered: {}", logs.len(), e);
                    return Ok(CycleReport::Failed(e.to_string()));
                }
                Err(_) => {
                    warn!(
                        "Sync batch of {} records timed out after {:?}",
                        logs.len(),
                        self.request_timeout
                    );
                    return Ok(CycleReport::Failed("request timed out".to_string()));
                }
            };

        let resolved = resolve(&outcome);
        let mut summary = SyncSummary {
            submitted: pending.len(),
            ..Default::default()
        };

        for record in &pending {
            match resolved.get(&claim_key(&record.claim)) {
                Some(Resolution::Confirmed) => {
                    self.queue.mark_synced(record.local_id).await?;
                    summary.confirmed += 1;
                }
                Some(Resolution::Duplicate) => {
                    self.queue.mark_synced(record.local_id).await?;
                    summary.duplicates += 1;
                }
                Some(Resolution::Failed(reason)) => {
                    self.queue.record_failure(record.local_id, reason).await?;
                    summary.failed += 1;
                }
                None => summary.unresolved += 1,
            }
        }

        summary.swept = self.queue.sweep_synced().await?;
        Ok(CycleReport::Completed(summary))
    }

    async fn trigger(&self, source: &str) -> Result<(), SyncError> {
        match self.run_cycle().await? {
            CycleReport::Completed(summary) => info!(
                trigger = source,
                submitted = summary.submitted,
                confirmed = summary.confirmed,
                duplicates = summary.duplicates,
                failed = summary.failed,
                unresolved = summary.unresolved,
                "Sync cycle completed"
            ),
            CycleReport::Failed(reason) => warn!("Sync cycle failed, will retry: {}", reason),
            other => debug!(trigger = source, "Sync cycle result: {:?}", other),
        }
        Ok(())
    }
}

/// Drives the coordinator until cancelled: one cycle right away, one per
/// `interval`, and one on every connectivity-restored edge.
///
/// Returns an error only when the local queue becomes unusable; the caller must
/// then stop capturing attendance.
pub async fn run_auto_sync(
    coordinator: Arc<SyncCoordinator>,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<(), SyncError> {
    let mut reachability = coordinator.monitor().subscribe();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let result = loop {
        let step = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            _ = ticker.tick() => coordinator.trigger("interval").await,
            Ok(()) = reachability.changed() => {
                if *reachability.borrow_and_update() {
                    coordinator.trigger("connectivity restored").await
                } else {
                    Ok(())
                }
            }
        };
        if let Err(e) = step {
            break Err(e);
        }
    };

    if let Err(ref e) = result {
        error!("Stopping auto-sync: {}", e);
    }
    result
}
