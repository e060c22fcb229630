//! services/scanner/src/adapters/queue.rs
//!
//! The device-local pending queue, backed by a SQLite file.
//!
//! The pool holds a single connection, so every queue operation is serialized
//! behind it. The journal runs in WAL mode with `synchronous = FULL`: once
//! `enqueue` returns, the claim survives a crash or power loss. `AUTOINCREMENT`
//! keeps local ids from being reused after a sweep.

use std::path::Path;

use async_trait::async_trait;
use attendance_core::domain::{AttendanceClaim, PendingRecord};
use attendance_core::ports::{PendingQueue, PortError, PortResult};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::FromRow;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_attendance (
    local_id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    created_at_ms INTEGER NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    synced_at_ms INTEGER,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
)
"#;

const PENDING_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_pending_unsynced ON pending_attendance (synced, local_id)";

#[derive(Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
}

impl SqliteQueue {
    /// Opens (creating if needed) the queue file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        sqlx::query(PENDING_INDEX).execute(&pool).await?;
        info!(path = %path.display(), "Pending queue opened");

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(FromRow)]
struct PendingRow {
    local_id: i64,
    student_id: String,
    session_id: String,
    timestamp_ms: i64,
    created_at_ms: i64,
    synced: bool,
    synced_at_ms: Option<i64>,
    attempts: i64,
    last_error: Option<String>,
}

impl PendingRow {
    fn to_domain(self) -> PortResult<PendingRecord> {
        let timestamp = instant(self.timestamp_ms)?;
        let claim = AttendanceClaim::new(self.student_id, self.session_id, timestamp)
            .map_err(|e| {
                PortError::Unexpected(format!("Corrupt queue row {}: {}", self.local_id, e))
            })?;
        Ok(PendingRecord {
            local_id: self.local_id,
            claim,
            created_at: instant(self.created_at_ms)?,
            synced: self.synced,
            synced_at: self.synced_at_ms.map(instant).transpose()?,
            attempts: u32::try_from(self.attempts).unwrap_or(u32::MAX),
            last_error: self.last_error,
        })
    }
}

fn instant(millis: i64) -> PortResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| PortError::Unexpected(format!("Timestamp out of range: {}", millis)))
}

fn storage(e: sqlx::Error) -> PortError {
    PortError::Unexpected(format!("Queue storage error: {}", e))
}

#[async_trait]
impl PendingQueue for SqliteQueue {
    async fn enqueue(&self, claim: &AttendanceClaim) -> PortResult<PendingRecord> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO pending_attendance (student_id, session_id, timestamp_ms, created_at_ms) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(claim.student_id())
        .bind(claim.session_id())
        .bind(claim.timestamp().timestamp_millis())
        .bind(created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        let local_id = result.last_insert_rowid();
        debug!(local_id, student_id = %claim.student_id(), "Claim queued");
        Ok(PendingRecord {
            local_id,
            claim: claim.clone(),
            created_at: instant(created_at.timestamp_millis())?,
            synced: false,
            synced_at: None,
            attempts: 0,
            last_error: None,
        })
    }

    async fn list_unsynced(&self) -> PortResult<Vec<PendingRecord>> {
        let rows = sqlx::query_as::<_, PendingRow>(
            "SELECT local_id, student_id, session_id, timestamp_ms, created_at_ms, \
                    synced, synced_at_ms, attempts, last_error \
             FROM pending_attendance WHERE synced = 0 ORDER BY local_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(PendingRow::to_domain).collect()
    }

    async fn mark_synced(&self, local_id: i64) -> PortResult<()> {
        sqlx::query(
            "UPDATE pending_attendance SET synced = 1, synced_at_ms = ? \
             WHERE local_id = ? AND synced = 0",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(local_id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn record_failure(&self, local_id: i64, reason: &str) -> PortResult<()> {
        sqlx::query(
            "UPDATE pending_attendance SET attempts = attempts + 1, last_error = ? \
             WHERE local_id = ? AND synced = 0",
        )
        .bind(reason)
        .bind(local_id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn sweep_synced(&self) -> PortResult<u64> {
        let result = sqlx::query("DELETE FROM pending_attendance WHERE synced = 1")
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn pending_count(&self) -> PortResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pending_attendance WHERE synced = 0")
                .fetch_one(&self.pool)
                .await
                .map_err(storage)?;
        Ok(count.max(0) as u64)
    }
}
