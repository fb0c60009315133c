use serde::{Deserialize, Serialize};

use loglens_core::{Job, JobId, JobStatus};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ProcessQuery {
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReportsQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

/// Returned by `process` and `resume`.
#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: JobId,
    pub status: JobStatus,
    pub filename: String,
    pub total_chunks: u32,
    pub resumed_from: Option<JobId>,
}

impl From<Job> for JobAccepted {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            filename: job.filename,
            total_chunks: job.total_chunks,
            resumed_from: job.resumed_from,
        }
    }
}
