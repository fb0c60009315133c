//! Durable job and chunk storage boundary.
//!
//! Mutations are single-field and conditional (status set, counter increment,
//! processed flag set) so concurrent readers never see half-written records.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use loglens_core::{Chunk, ChunkId, ChunkResult, DomainError, Job, JobId, JobStatus};

pub use in_memory::{InMemoryChunkStore, InMemoryJobStore};
pub use postgres::{PostgresChunkStore, PostgresJobStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// The stored record rejected the mutation (state machine or bound violation).
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn job_not_found(id: JobId) -> Self {
        StoreError::NotFound(format!("job {id}"))
    }

    pub fn chunk_not_found(id: ChunkId) -> Self {
        StoreError::NotFound(format!("chunk {id}"))
    }
}

/// Job metadata store. Owned by the orchestrator.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Move `id` to `to` if its current status permits it, stamping timestamps.
    ///
    /// Entering `Processing` fails with [`DomainError::Conflict`] while another
    /// job is already processing.
    async fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        error_message: Option<String>,
    ) -> Result<Job, StoreError>;

    /// Increment `chunks_processed`, never past `total_chunks`. Returns the new count.
    ///
    /// Only a `Processing` job advances; any other status is a [`DomainError::Conflict`].
    async fn increment_processed(&self, id: JobId) -> Result<u32, StoreError>;

    /// Remove a job that never left `Pending`. Returns whether a row was removed.
    async fn discard(&self, id: JobId) -> Result<bool, StoreError>;

    /// Newest first. `None` lists every status.
    async fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError>;

    async fn find_processing(&self) -> Result<Option<Job>, StoreError>;
}

/// Chunk payloads and their append-only results. Written by the chunk processor.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError>;

    async fn get_chunk(&self, id: ChunkId) -> Result<Option<Chunk>, StoreError>;

    /// Ordered by `chunk_number`.
    async fn chunks_for_job(&self, job_id: JobId) -> Result<Vec<Chunk>, StoreError>;

    /// Ordered by `chunk_number`.
    async fn unprocessed_chunks(&self, job_id: JobId) -> Result<Vec<Chunk>, StoreError>;

    /// Flip `processed` to true. Rejected while the chunk has no persisted result.
    async fn mark_processed(&self, id: ChunkId) -> Result<(), StoreError>;

    async fn append_result(&self, result: &ChunkResult) -> Result<(), StoreError>;

    /// In persistence order.
    async fn results_for_chunk(&self, chunk_id: ChunkId) -> Result<Vec<ChunkResult>, StoreError>;

    /// Ordered by chunk number, then persistence order.
    async fn results_for_job(&self, job_id: JobId) -> Result<Vec<ChunkResult>, StoreError>;

    async fn count_anomalies(&self, job_id: JobId) -> Result<u64, StoreError>;

    /// Remove every chunk of `job_id` along with its results. Returns the chunk count removed.
    async fn discard_chunks(&self, job_id: JobId) -> Result<u64, StoreError>;
}

#[async_trait]
impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        (**self).insert(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        (**self).get(id).await
    }

    async fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        error_message: Option<String>,
    ) -> Result<Job, StoreError> {
        (**self).transition(id, to, error_message).await
    }

    async fn increment_processed(&self, id: JobId) -> Result<u32, StoreError> {
        (**self).increment_processed(id).await
    }

    async fn discard(&self, id: JobId) -> Result<bool, StoreError> {
        (**self).discard(id).await
    }

    async fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        (**self).list_by_status(status, limit).await
    }

    async fn find_processing(&self) -> Result<Option<Job>, StoreError> {
        (**self).find_processing().await
    }
}

#[async_trait]
impl<S> ChunkStore for Arc<S>
where
    S: ChunkStore + ?Sized,
{
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError> {
        (**self).insert_chunks(chunks).await
    }

    async fn get_chunk(&self, id: ChunkId) -> Result<Option<Chunk>, StoreError> {
        (**self).get_chunk(id).await
    }

    async fn chunks_for_job(&self, job_id: JobId) -> Result<Vec<Chunk>, StoreError> {
        (**self).chunks_for_job(job_id).await
    }

    async fn unprocessed_chunks(&self, job_id: JobId) -> Result<Vec<Chunk>, StoreError> {
        (**self).unprocessed_chunks(job_id).await
    }

    async fn mark_processed(&self, id: ChunkId) -> Result<(), StoreError> {
        (**self).mark_processed(id).await
    }

    async fn append_result(&self, result: &ChunkResult) -> Result<(), StoreError> {
        (**self).append_result(result).await
    }

    async fn results_for_chunk(&self, chunk_id: ChunkId) -> Result<Vec<ChunkResult>, StoreError> {
        (**self).results_for_chunk(chunk_id).await
    }

    async fn results_for_job(&self, job_id: JobId) -> Result<Vec<ChunkResult>, StoreError> {
        (**self).results_for_job(job_id).await
    }

    async fn count_anomalies(&self, job_id: JobId) -> Result<u64, StoreError> {
        (**self).count_anomalies(job_id).await
    }

    async fn discard_chunks(&self, job_id: JobId) -> Result<u64, StoreError> {
        (**self).discard_chunks(job_id).await
    }
}
