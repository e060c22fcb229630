//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of the
//! `AttendanceStore`, `RosterService` and `AccessService` ports from the core
//! crate. It handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use attendance_core::domain::{Caller, CallerRole, CanonicalAttendanceRecord};
use attendance_core::ports::{
    AccessService, AttendanceStore, InsertOutcome, PortError, PortResult, RecordQuery,
    RosterService,
};
use attendance_core::ingestion::dedup_bucket;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the server-side ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    /// Creates a bearer token for `operator` and returns it in clear text.
    /// Only its digest is stored.
    pub async fn create_api_token(&self, operator: &str, role: CallerRole) -> PortResult<String> {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);

        sqlx::query("INSERT INTO api_tokens (token_hash, operator, role) VALUES ($1, $2, $3)")
            .bind(hash_token(&token))
            .bind(operator)
            .bind(role.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(token)
    }
}

/// SHA-256 hex digest under which a bearer token is stored.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct AttendanceRecordRow {
    id: Uuid,
    student_id: String,
    session_id: String,
    claimed_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
    confirmed_at: DateTime<Utc>,
}
impl AttendanceRecordRow {
    fn to_domain(self) -> CanonicalAttendanceRecord {
        CanonicalAttendanceRecord {
            id: self.id,
            student_id: self.student_id,
            session_id: self.session_id,
            timestamp: self.claimed_at,
            recorded_at: self.recorded_at,
            confirmed_at: self.confirmed_at,
        }
    }
}

#[derive(FromRow)]
struct ApiTokenRow {
    operator: String,
    role: String,
}

const RECORD_COLUMNS: &str = "id, student_id, session_id, claimed_at, recorded_at, confirmed_at";

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// `AttendanceStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AttendanceStore for DbAdapter {
    async fn find_in_window(
        &self,
        student_id: &str,
        session_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PortResult<Option<CanonicalAttendanceRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM attendance \
             WHERE student_id = $1 AND session_id = $2 AND claimed_at BETWEEN $3 AND $4 \
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, AttendanceRecordRow>(&sql)
            .bind(student_id)
            .bind(session_id)
            .bind(from)
            .bind(to)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(row.map(AttendanceRecordRow::to_domain))
    }

    async fn insert_record(
        &self,
        record: &CanonicalAttendanceRecord,
        window: Duration,
    ) -> PortResult<InsertOutcome> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // Held until commit or rollback; serializes inserts for this pair.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1 || '|' || $2))")
            .bind(&record.student_id)
            .bind(&record.session_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM attendance \
             WHERE student_id = $1 AND session_id = $2 AND claimed_at BETWEEN $3 AND $4 \
             LIMIT 1",
        )
        .bind(&record.student_id)
        .bind(&record.session_id)
        .bind(record.timestamp - window)
        .bind(record.timestamp + window)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;
        if existing.is_some() {
            return Ok(InsertOutcome::Conflict);
        }

        let sql = format!(
            "INSERT INTO attendance \
             (id, student_id, session_id, claimed_at, dedup_bucket, recorded_at, confirmed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (student_id, session_id, dedup_bucket) DO NOTHING \
             RETURNING {RECORD_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AttendanceRecordRow>(&sql)
            .bind(record.id)
            .bind(&record.student_id)
            .bind(&record.session_id)
            .bind(record.timestamp)
            .bind(dedup_bucket(record.timestamp, window))
            .bind(record.recorded_at)
            .bind(record.confirmed_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)?;

        Ok(match row {
            Some(row) => InsertOutcome::Inserted(row.to_domain()),
            None => InsertOutcome::Conflict,
        })
    }

    async fn list_records(
        &self,
        query: &RecordQuery,
    ) -> PortResult<(Vec<CanonicalAttendanceRecord>, i64)> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM attendance \
             WHERE ($1::text IS NULL OR student_id = $1) \
               AND ($2::text IS NULL OR session_id = $2) \
             ORDER BY claimed_at DESC \
             LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query_as::<_, AttendanceRecordRow>(&sql)
            .bind(query.student_id.as_deref())
            .bind(query.session_id.as_deref())
            .bind(query.limit)
            .bind(query.skip)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM attendance \
             WHERE ($1::text IS NULL OR student_id = $1) \
               AND ($2::text IS NULL OR session_id = $2)",
        )
        .bind(query.student_id.as_deref())
        .bind(query.session_id.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let records = rows.into_iter().map(|r| r.to_domain()).collect();
        Ok((records, total))
    }
}

//=========================================================================================
// `RosterService` and `AccessService` Trait Implementations
//=========================================================================================

#[async_trait]
impl RosterService for DbAdapter {
    async fn student_exists(&self, student_id: &str) -> PortResult<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM students WHERE student_id = $1)")
            .bind(student_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

#[async_trait]
impl AccessService for DbAdapter {
    async fn authenticate(&self, bearer_token: &str) -> PortResult<Caller> {
        let row = sqlx::query_as::<_, ApiTokenRow>(
            "SELECT operator, role FROM api_tokens WHERE token_hash = $1 AND revoked_at IS NULL",
        )
        .bind(hash_token(bearer_token))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?
        .ok_or(PortError::Unauthorized)?;

        let role = CallerRole::parse(&row.role).ok_or_else(|| {
            PortError::Unexpected(format!("Unknown role '{}' for token", row.role))
        })?;
        Ok(Caller {
            operator: row.operator,
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hash_is_stable_sha256_hex() {
        let digest = hash_token("abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(hash_token("abd"), digest);
    }
}
