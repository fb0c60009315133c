//! Postgres-backed job and chunk stores.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation on the single-flight index) | `23505` | `Domain(Conflict)` |
//! | Database (other unique violation) | `23505` | `Domain(Conflict)` |
//! | Database (check constraint violation) | `23514` | `Domain(LimitExceeded)` |
//! | Database (other) / PoolClosed / Other | any | `Storage` |
//!
//! At most one job may be `processing` at a time; a partial unique index enforces
//! this even when several orchestrator instances share the database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;

use loglens_core::{
    AnomalyRecord, Chunk, ChunkId, ChunkResult, DomainError, Job, JobId, JobStatus,
};

use super::{ChunkStore, JobStore, StoreError};

/// DDL applied by [`apply_schema`], one statement per entry.
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS processing_jobs (
        id               UUID PRIMARY KEY,
        filename         TEXT NOT NULL,
        total_size       BIGINT NOT NULL,
        total_chunks     INTEGER NOT NULL CHECK (total_chunks >= 0),
        chunks_processed INTEGER NOT NULL DEFAULT 0
                         CHECK (chunks_processed >= 0 AND chunks_processed <= total_chunks),
        status           TEXT NOT NULL,
        created_at       TIMESTAMPTZ NOT NULL,
        started_at       TIMESTAMPTZ NULL,
        completed_at     TIMESTAMPTZ NULL,
        error_message    TEXT NULL,
        resumed_from     UUID NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS processing_jobs_single_flight
        ON processing_jobs ((status)) WHERE status = 'processing'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS log_chunks (
        id           UUID PRIMARY KEY,
        job_id       UUID NOT NULL REFERENCES processing_jobs (id),
        chunk_number INTEGER NOT NULL,
        data         TEXT NOT NULL,
        size         BIGINT NOT NULL,
        processed    BOOLEAN NOT NULL DEFAULT FALSE,
        created_at   TIMESTAMPTZ NOT NULL,
        UNIQUE (job_id, chunk_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_results (
        seq             BIGSERIAL PRIMARY KEY,
        chunk_id        UUID NOT NULL REFERENCES log_chunks (id),
        job_id          UUID NOT NULL REFERENCES processing_jobs (id),
        anomalies       JSONB NOT NULL,
        processing_time DOUBLE PRECISION NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS chunk_results_by_job ON chunk_results (job_id, seq)
    "#,
];

/// Create the pipeline tables if they do not exist.
pub async fn apply_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("apply_schema", e))?;
    }
    Ok(())
}

const JOB_COLUMNS: &str = "id, filename, total_size, total_chunks, chunks_processed, status, \
                           created_at, started_at, completed_at, error_message, resumed_from";

const CHUNK_COLUMNS: &str = "id, job_id, chunk_number, data, size, processed, created_at";

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO processing_jobs
                (id, filename, total_size, total_chunks, chunks_processed, status,
                 created_at, started_at, completed_at, error_message, resumed_from)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(&job.filename)
        .bind(to_i64(job.total_size)?)
        .bind(to_i32(job.total_chunks)?)
        .bind(to_i32(job.chunks_processed)?)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.error_message.as_deref())
        .bind(job.resumed_from.map(|id| *id.as_uuid()))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM processing_jobs WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_job", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self, error_message), fields(job_id = %id, to = %to), err)]
    async fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        error_message: Option<String>,
    ) -> Result<Job, StoreError> {
        let from: Vec<&str> = to.predecessors().iter().map(|s| s.as_str()).collect();
        let now = Utc::now();

        let row = sqlx::query(&format!(
            r#"
            UPDATE processing_jobs SET
                status = $2::text,
                started_at = CASE WHEN $2::text = 'processing' THEN $3::timestamptz ELSE started_at END,
                completed_at = CASE WHEN $2::text IN ('completed', 'failed', 'cancelled')
                                    THEN $3::timestamptz ELSE completed_at END,
                error_message = CASE WHEN $2::text = 'failed' THEN $4::text ELSE error_message END
            WHERE id = $1 AND status = ANY($5)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(to.as_str())
        .bind(now)
        .bind(error_message.as_deref())
        .bind(&from)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transition_job", e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => match self.get(id).await? {
                Some(job) => Err(DomainError::InvalidTransition {
                    from: job.status,
                    to,
                }
                .into()),
                None => Err(StoreError::job_not_found(id)),
            },
        }
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn increment_processed(&self, id: JobId) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET chunks_processed = chunks_processed + 1
            WHERE id = $1 AND status = 'processing' AND chunks_processed < total_chunks
            RETURNING chunks_processed
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("increment_processed", e))?;

        match row {
            Some(row) => {
                let n: i32 = row.try_get("chunks_processed").map_err(decode_error)?;
                to_u32(n)
            }
            None => match self.get(id).await? {
                Some(job) if job.status != JobStatus::Processing => Err(DomainError::conflict(
                    format!("job {id} is {}, not processing", job.status),
                )
                .into()),
                Some(job) => Err(DomainError::limit(format!(
                    "job {id} already processed {}/{} chunks",
                    job.chunks_processed, job.total_chunks
                ))
                .into()),
                None => Err(StoreError::job_not_found(id)),
            },
        }
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn discard(&self, id: JobId) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM processing_jobs WHERE id = $1 AND status = 'pending'")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("discard_job", e))?
            .rows_affected();

        if deleted == 1 {
            return Ok(true);
        }
        match self.get(id).await? {
            Some(job) => Err(DomainError::conflict(format!("job {id} is {}, not pending", job.status)).into()),
            None => Ok(false),
        }
    }

    #[instrument(skip(self), err)]
    async fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM processing_jobs
            WHERE ($1::text IS NULL OR status = $1::text)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn find_processing(&self) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM processing_jobs WHERE status = 'processing' LIMIT 1"
        ))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_processing", e))?;

        row.as_ref().map(job_from_row).transpose()
    }
}

#[derive(Debug, Clone)]
pub struct PostgresChunkStore {
    pool: Arc<PgPool>,
}

impl PostgresChunkStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ChunkStore for PostgresChunkStore {
    #[instrument(skip(self, chunks), fields(chunk_count = chunks.len()), err)]
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_chunks", e))?;

        for c in chunks {
            sqlx::query(
                r#"
                INSERT INTO log_chunks (id, job_id, chunk_number, data, size, processed, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(c.id.as_uuid())
            .bind(c.job_id.as_uuid())
            .bind(to_i32(c.chunk_number)?)
            .bind(&c.data)
            .bind(to_i64(c.size)?)
            .bind(c.processed)
            .bind(c.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_chunks", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_chunks", e))
    }

    #[instrument(skip(self), fields(chunk_id = %id), err)]
    async fn get_chunk(&self, id: ChunkId) -> Result<Option<Chunk>, StoreError> {
        let row = sqlx::query(&format!("SELECT {CHUNK_COLUMNS} FROM log_chunks WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_chunk", e))?;

        row.as_ref().map(chunk_from_row).transpose()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn chunks_for_job(&self, job_id: JobId) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CHUNK_COLUMNS} FROM log_chunks WHERE job_id = $1 ORDER BY chunk_number ASC"
        ))
        .bind(job_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("chunks_for_job", e))?;

        rows.iter().map(chunk_from_row).collect()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn unprocessed_chunks(&self, job_id: JobId) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CHUNK_COLUMNS} FROM log_chunks
            WHERE job_id = $1 AND NOT processed
            ORDER BY chunk_number ASC
            "#
        ))
        .bind(job_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("unprocessed_chunks", e))?;

        rows.iter().map(chunk_from_row).collect()
    }

    #[instrument(skip(self), fields(chunk_id = %id), err)]
    async fn mark_processed(&self, id: ChunkId) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE log_chunks SET processed = TRUE
            WHERE id = $1 AND EXISTS (SELECT 1 FROM chunk_results WHERE chunk_id = $1)
            "#,
        )
        .bind(id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_processed", e))?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }
        match self.get_chunk(id).await? {
            Some(_) => Err(DomainError::validation(format!("chunk {id} has no persisted results")).into()),
            None => Err(StoreError::chunk_not_found(id)),
        }
    }

    #[instrument(
        skip(self, result),
        fields(chunk_id = %result.chunk_id, anomalies = result.anomalies.len()),
        err
    )]
    async fn append_result(&self, result: &ChunkResult) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chunk_results (chunk_id, job_id, anomalies, processing_time, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(result.chunk_id.as_uuid())
        .bind(result.job_id.as_uuid())
        .bind(Json(&result.anomalies))
        .bind(result.processing_time)
        .bind(result.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_result", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(chunk_id = %chunk_id), err)]
    async fn results_for_chunk(&self, chunk_id: ChunkId) -> Result<Vec<ChunkResult>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, job_id, anomalies, processing_time, created_at
            FROM chunk_results
            WHERE chunk_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(chunk_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("results_for_chunk", e))?;

        rows.iter().map(result_from_row).collect()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn results_for_job(&self, job_id: JobId) -> Result<Vec<ChunkResult>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT r.chunk_id, r.job_id, r.anomalies, r.processing_time, r.created_at
            FROM chunk_results r
            JOIN log_chunks c ON c.id = r.chunk_id
            WHERE r.job_id = $1
            ORDER BY c.chunk_number ASC, r.seq ASC
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("results_for_job", e))?;

        rows.iter().map(result_from_row).collect()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn count_anomalies(&self, job_id: JobId) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(jsonb_array_length(anomalies)), 0)::BIGINT AS total
            FROM chunk_results
            WHERE job_id = $1
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_anomalies", e))?;

        let total: i64 = row.try_get("total").map_err(decode_error)?;
        u64::try_from(total).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn discard_chunks(&self, job_id: JobId) -> Result<u64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("discard_chunks", e))?;

        sqlx::query("DELETE FROM chunk_results WHERE job_id = $1")
            .bind(job_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("discard_chunks", e))?;
        let removed = sqlx::query("DELETE FROM log_chunks WHERE job_id = $1")
            .bind(job_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("discard_chunks", e))?
            .rows_affected();

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("discard_chunks", e))?;
        Ok(removed)
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    let total_size: i64 = row.try_get("total_size").map_err(decode_error)?;
    let total_chunks: i32 = row.try_get("total_chunks").map_err(decode_error)?;
    let chunks_processed: i32 = row.try_get("chunks_processed").map_err(decode_error)?;
    let resumed_from: Option<uuid::Uuid> = row.try_get("resumed_from").map_err(decode_error)?;

    Ok(Job {
        id: JobId::from_uuid(row.try_get("id").map_err(decode_error)?),
        filename: row.try_get("filename").map_err(decode_error)?,
        total_size: u64::try_from(total_size).map_err(|e| StoreError::Serialization(e.to_string()))?,
        total_chunks: to_u32(total_chunks)?,
        chunks_processed: to_u32(chunks_processed)?,
        status: status
            .parse()
            .map_err(|e: DomainError| StoreError::Serialization(e.to_string()))?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode_error)?,
        started_at: row.try_get("started_at").map_err(decode_error)?,
        completed_at: row.try_get("completed_at").map_err(decode_error)?,
        error_message: row.try_get("error_message").map_err(decode_error)?,
        resumed_from: resumed_from.map(JobId::from_uuid),
    })
}

fn chunk_from_row(row: &PgRow) -> Result<Chunk, StoreError> {
    let chunk_number: i32 = row.try_get("chunk_number").map_err(decode_error)?;
    let size: i64 = row.try_get("size").map_err(decode_error)?;

    Ok(Chunk {
        id: ChunkId::from_uuid(row.try_get("id").map_err(decode_error)?),
        job_id: JobId::from_uuid(row.try_get("job_id").map_err(decode_error)?),
        chunk_number: to_u32(chunk_number)?,
        data: row.try_get("data").map_err(decode_error)?,
        size: u64::try_from(size).map_err(|e| StoreError::Serialization(e.to_string()))?,
        processed: row.try_get("processed").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn result_from_row(row: &PgRow) -> Result<ChunkResult, StoreError> {
    let Json(anomalies): Json<Vec<AnomalyRecord>> = row.try_get("anomalies").map_err(decode_error)?;

    Ok(ChunkResult {
        chunk_id: ChunkId::from_uuid(row.try_get("chunk_id").map_err(decode_error)?),
        job_id: JobId::from_uuid(row.try_get("job_id").map_err(decode_error)?),
        anomalies,
        processing_time: row.try_get("processing_time").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn to_i32(n: u32) -> Result<i32, StoreError> {
    i32::try_from(n).map_err(|_| DomainError::limit(format!("{n} does not fit in INTEGER")).into())
}

fn to_i64(n: u64) -> Result<i64, StoreError> {
    i64::try_from(n).map_err(|_| DomainError::limit(format!("{n} does not fit in BIGINT")).into())
}

fn to_u32(n: i32) -> Result<u32, StoreError> {
    u32::try_from(n).map_err(|_| StoreError::Serialization(format!("negative count {n} in row")))
}

fn decode_error(e: sqlx::Error) -> StoreError {
    StoreError::Serialization(format!("failed to decode row: {e}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => {
                    if db_err.constraint() == Some("processing_jobs_single_flight") {
                        DomainError::conflict("another job is already processing").into()
                    } else {
                        DomainError::conflict(msg).into()
                    }
                }
                Some("23514") => DomainError::limit(msg).into(),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
