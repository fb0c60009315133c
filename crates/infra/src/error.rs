use loglens_ai::ScorerError;
use loglens_core::{DomainError, JobId, JobStatus};
use loglens_events::BroadcastError;

use crate::store::StoreError;

/// Errors surfaced by the job pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Rejected input; nothing was created.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Another job holds the single-flight lease.
    #[error("job {active} is already processing")]
    Busy { active: JobId },

    #[error("job {0} not found")]
    NotFound(JobId),

    /// The operation does not apply to a job in this status.
    #[error("job {job_id} is {status}: {reason}")]
    InvalidState {
        job_id: JobId,
        status: JobStatus,
        reason: String,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("scorer error: {0}")]
    Scorer(#[from] ScorerError),

    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),
}

impl From<DomainError> for PipelineError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) => PipelineError::Validation(msg),
            other => PipelineError::Store(StoreError::Domain(other)),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
