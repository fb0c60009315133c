//! Last-known job state cached alongside the broadcast topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loglens_core::{Job, JobId, JobStatus};

use crate::event::{EventEnvelope, ProgressEvent};

/// Snapshot replayed to subscribers when they connect.
///
/// `status` is `None` when nothing has been cached for the job (or the entry expired).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: JobId,
    pub status: Option<JobStatus>,
    /// Fraction of chunks processed, `0.0..=1.0`.
    pub progress: f64,
    pub chunks_processed: u32,
    pub total_chunks: u32,
    pub anomalies_found: u64,
    pub current_chunk: Option<u32>,
    /// Percentage of the current chunk processed.
    pub chunk_progress: Option<f64>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    pub fn unknown(job_id: JobId) -> Self {
        Self {
            job_id,
            status: None,
            progress: 0.0,
            chunks_processed: 0,
            total_chunks: 0,
            anomalies_found: 0,
            current_chunk: None,
            chunk_progress: None,
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    pub fn from_job(job: &Job, anomalies_found: u64) -> Self {
        Self {
            job_id: job.id,
            status: Some(job.status),
            progress: job.progress(),
            chunks_processed: job.chunks_processed,
            total_chunks: job.total_chunks,
            anomalies_found,
            current_chunk: None,
            chunk_progress: None,
            error_message: job.error_message.clone(),
            updated_at: Utc::now(),
        }
    }

    /// A subscriber may stop listening once the cached state reaches this point.
    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }

    /// Fold a published event into the snapshot.
    pub fn apply(&mut self, envelope: &EventEnvelope) {
        match envelope.event() {
            ProgressEvent::BatchProgress(e) => {
                self.mark_processing();
                self.current_chunk = Some(e.chunk_number);
                self.chunk_progress = Some(e.progress);
                self.anomalies_found += e.anomalies.len() as u64;
            }
            ProgressEvent::ChunkProgress(e) => {
                self.mark_processing();
                self.current_chunk = Some(e.chunk_number);
                self.chunk_progress = Some(100.0);
                self.chunks_processed = e.chunks_processed;
                self.total_chunks = e.total_chunks;
                self.anomalies_found = e.anomalies_found;
                self.progress = ratio(e.chunks_processed, e.total_chunks);
            }
            ProgressEvent::JobCompleted(e) => {
                self.status = Some(JobStatus::Completed);
                self.chunks_processed = e.chunks_processed;
                self.total_chunks = e.total_chunks;
                self.anomalies_found = e.anomalies_found;
                self.progress = 1.0;
            }
            ProgressEvent::JobFailed(e) => {
                self.status = Some(JobStatus::Failed);
                self.chunks_processed = e.chunks_processed;
                self.total_chunks = e.total_chunks;
                self.progress = ratio(e.chunks_processed, e.total_chunks);
                self.error_message = Some(e.error.clone());
            }
        }
        self.updated_at = envelope.timestamp();
    }

    /// Late progress from an interrupted chunk must not revive a settled job.
    fn mark_processing(&mut self) {
        if !self.is_terminal() {
            self.status = Some(JobStatus::Processing);
        }
    }
}

fn ratio(done: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        f64::from(done) / f64::from(total)
    }
}
