//! In-memory port doubles shared by the engine's unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Notify;

use crate::domain::{
    AttendanceClaim, CanonicalAttendanceRecord, PendingRecord, QrToken, TokenPayload,
};
use crate::ports::{IngestionGateway, MarkDisposition, PendingQueue, PortError, PortResult};
use crate::token::TokenCodec;
use crate::wire::{parse_instant, AttendanceLog, BatchOutcome};

fn base_time() -> DateTime<Utc> {
    parse_instant("2024-03-01T09:00:00.000Z").unwrap()
}

/// A claim `offset_secs` after a fixed base instant.
pub(crate) fn claim(student: &str, session: &str, offset_secs: i64) -> AttendanceClaim {
    AttendanceClaim::new(
        student,
        session,
        base_time() + ChronoDuration::seconds(offset_secs),
    )
    .unwrap()
}

/// The canonical record a server would create for `log`.
pub(crate) fn confirm(log: &AttendanceLog) -> CanonicalAttendanceRecord {
    let time = parse_instant(log.time.as_deref().unwrap()).unwrap();
    let claim = AttendanceClaim::new(
        log.student_id.clone().unwrap(),
        log.session_id.clone().unwrap(),
        time,
    )
    .unwrap();
    CanonicalAttendanceRecord::from_claim(&claim, Utc::now())
}

#[derive(Default)]
pub(crate) struct MemoryQueue {
    records: Mutex<Vec<PendingRecord>>,
    next_id: Mutex<i64>,
    unavailable: AtomicBool,
}

impl MemoryQueue {
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> PortResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(PortError::Unexpected("disk I/O error".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PendingQueue for MemoryQueue {
    async fn enqueue(&self, claim: &AttendanceClaim) -> PortResult<PendingRecord> {
        self.check()?;
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let record = PendingRecord {
            local_id: *next_id,
            claim: claim.clone(),
            created_at: Utc::now(),
            synced: false,
            synced_at: None,
            attempts: 0,
            last_error: None,
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn list_unsynced(&self) -> PortResult<Vec<PendingRecord>> {
        self.check()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.synced)
            .cloned()
            .collect())
    }

    async fn mark_synced(&self, local_id: i64) -> PortResult<()> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records
            .iter_mut()
            .find(|r| r.local_id == local_id && !r.synced)
        {
            record.synced = true;
            record.synced_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn record_failure(&self, local_id: i64, reason: &str) -> PortResult<()> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records
            .iter_mut()
            .find(|r| r.local_id == local_id && !r.synced)
        {
            record.attempts += 1;
            record.last_error = Some(reason.to_string());
        }
        Ok(())
    }

    async fn sweep_synced(&self) -> PortResult<u64> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| !r.synced);
        Ok((before - records.len()) as u64)
    }

    async fn pending_count(&self) -> PortResult<u64> {
        Ok(self.list_unsynced().await?.len() as u64)
    }
}

type BatchFn = Box<dyn Fn(&[AttendanceLog]) -> PortResult<BatchOutcome> + Send + Sync>;
type SingleFn = Box<dyn Fn(&AttendanceClaim) -> PortResult<MarkDisposition> + Send + Sync>;

/// Blocks `submit_batch` until released, to observe a cycle mid-flight.
#[derive(Default)]
struct Hold {
    entered: Notify,
    release: Notify,
}

pub(crate) struct ScriptedGateway {
    batch: BatchFn,
    single: SingleFn,
    decoder: Option<TokenCodec>,
    delay: Option<Duration>,
    hold: Option<Arc<Hold>>,
    pub(crate) batches: Mutex<Vec<Vec<AttendanceLog>>>,
    pub(crate) singles: Mutex<Vec<AttendanceClaim>>,
}

impl ScriptedGateway {
    pub(crate) fn with_batch(
        batch: impl Fn(&[AttendanceLog]) -> PortResult<BatchOutcome> + Send + Sync + 'static,
    ) -> Self {
        Self {
            batch: Box::new(batch),
            single: Box::new(|claim| {
                Ok(MarkDisposition::Confirmed(
                    CanonicalAttendanceRecord::from_claim(claim, Utc::now()),
                ))
            }),
            decoder: None,
            delay: None,
            hold: None,
            batches: Mutex::new(Vec::new()),
            singles: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn confirming_all() -> Self {
        Self::with_batch(|logs| {
            Ok(BatchOutcome {
                confirmed: logs.iter().map(confirm).collect(),
                ..Default::default()
            })
        })
    }

    pub(crate) fn with_single(
        mut self,
        single: impl Fn(&AttendanceClaim) -> PortResult<MarkDisposition> + Send + Sync + 'static,
    ) -> Self {
        self.single = Box::new(single);
        self
    }

    pub(crate) fn decoding_with(mut self, codec: TokenCodec) -> Self {
        self.decoder = Some(codec);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn held(mut self) -> Self {
        self.hold = Some(Arc::new(Hold::default()));
        self
    }

    pub(crate) async fn wait_until_entered(&self) {
        if let Some(hold) = &self.hold {
            hold.entered.notified().await;
        }
    }

    pub(crate) fn release(&self) {
        if let Some(hold) = &self.hold {
            hold.release.notify_one();
        }
    }
}

#[async_trait]
impl IngestionGateway for ScriptedGateway {
    async fn submit_batch(&self, logs: &[AttendanceLog]) -> PortResult<BatchOutcome> {
        self.batches.lock().unwrap().push(logs.to_vec());
        if let Some(hold) = &self.hold {
            hold.entered.notify_one();
            hold.release.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.batch)(logs)
    }

    async fn mark_single(&self, claim: &AttendanceClaim) -> PortResult<MarkDisposition> {
        self.singles.lock().unwrap().push(claim.clone());
        (self.single)(claim)
    }

    async fn decode_token(&self, token: &QrToken) -> PortResult<TokenPayload> {
        match &self.decoder {
            Some(codec) => codec
                .decode(token)
                .map_err(|e| PortError::Rejected(e.to_string())),
            None => Err(PortError::Transport("no decode authority".to_string())),
        }
    }
}
