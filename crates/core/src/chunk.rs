//! Chunk payloads and their append-only results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ChunkId, JobId};

/// A line-aligned slice of a job's source content.
///
/// Immutable apart from `processed`, which flips to `true` once all of its
/// results are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub job_id: JobId,
    /// 0-indexed, contiguous and unique per job.
    pub chunk_number: u32,
    pub data: String,
    pub size: u64,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub fn new(job_id: JobId, chunk_number: u32, data: impl Into<String>) -> Self {
        let data = data.into();
        Self {
            id: ChunkId::new(),
            job_id,
            chunk_number,
            size: data.len() as u64,
            data,
            processed: false,
            created_at: Utc::now(),
        }
    }

    /// Lines of the chunk in order, including blank ones.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.data.lines()
    }

    pub fn line_count(&self) -> usize {
        self.data.lines().count()
    }
}

/// One anomalous log line with its explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub log_entry: String,
    /// Lower is more anomalous; within `(-1, 0]`.
    pub score: f64,
    pub is_anomaly: bool,
    pub explanation: String,
    pub chunk_id: ChunkId,
}

impl AnomalyRecord {
    pub fn new(
        chunk_id: ChunkId,
        log_entry: impl Into<String>,
        score: f64,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            log_entry: log_entry.into(),
            score,
            is_anomaly: true,
            explanation: explanation.into(),
            chunk_id,
        }
    }
}

/// Results of one sub-batch of a chunk.
///
/// A chunk may own several of these; each is persisted before the next
/// sub-batch starts so that completed work survives a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub chunk_id: ChunkId,
    pub job_id: JobId,
    pub anomalies: Vec<AnomalyRecord>,
    /// Seconds spent on the sub-batch.
    pub processing_time: f64,
    pub created_at: DateTime<Utc>,
}

impl ChunkResult {
    pub fn new(
        chunk_id: ChunkId,
        job_id: JobId,
        anomalies: Vec<AnomalyRecord>,
        processing_time: f64,
    ) -> Self {
        Self {
            chunk_id,
            job_id,
            anomalies,
            processing_time,
            created_at: Utc::now(),
        }
    }
}
