use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use loglens_core::{AnomalyRecord, ChunkId, JobId};

/// Progress of one sub-batch inside a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub job_id: JobId,
    pub chunk_id: ChunkId,
    pub chunk_number: u32,
    /// Percentage of the chunk's lines processed so far, `0..=100`.
    pub progress: f64,
    pub lines_processed: usize,
    pub total_lines: usize,
    /// Anomalies found in this sub-batch.
    pub anomalies: Vec<AnomalyRecord>,
}

/// A chunk finished and its processed flag is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkProgress {
    pub job_id: JobId,
    pub chunk_id: ChunkId,
    pub chunk_number: u32,
    pub chunks_processed: u32,
    pub total_chunks: u32,
    pub chunk_anomalies: usize,
    /// Running total for the whole job.
    pub anomalies_found: u64,
    /// Seconds spent on the chunk.
    pub processing_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompleted {
    pub job_id: JobId,
    pub chunks_processed: u32,
    pub total_chunks: u32,
    pub anomalies_found: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailed {
    pub job_id: JobId,
    pub chunks_processed: u32,
    pub total_chunks: u32,
    pub error: String,
}

/// Progress event kinds published per job.
///
/// Serialized adjacently tagged: `{"type": "batch_progress", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ProgressEvent {
    BatchProgress(BatchProgress),
    ChunkProgress(ChunkProgress),
    JobCompleted(JobCompleted),
    JobFailed(JobFailed),
}

impl ProgressEvent {
    /// Stable wire name of the event kind.
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::BatchProgress(_) => "batch_progress",
            ProgressEvent::ChunkProgress(_) => "chunk_progress",
            ProgressEvent::JobCompleted(_) => "job_completed",
            ProgressEvent::JobFailed(_) => "job_failed",
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            ProgressEvent::BatchProgress(e) => e.job_id,
            ProgressEvent::ChunkProgress(e) => e.job_id,
            ProgressEvent::JobCompleted(e) => e.job_id,
            ProgressEvent::JobFailed(e) => e.job_id,
        }
    }

    /// No further events follow a terminal event for the same job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::JobCompleted(_) | ProgressEvent::JobFailed(_)
        )
    }
}

/// A timestamped progress event as it crosses the broadcast boundary.
///
/// Wire shape: `{"type": ..., "payload": {...}, "timestamp": "<rfc3339>"}`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    event: ProgressEvent,
    timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: ProgressEvent) -> Self {
        Self::at(event, Utc::now())
    }

    pub fn at(event: ProgressEvent, timestamp: DateTime<Utc>) -> Self {
        Self { event, timestamp }
    }

    pub fn event(&self) -> &ProgressEvent {
        &self.event
    }

    pub fn into_event(self) -> ProgressEvent {
        self.event
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn job_id(&self) -> JobId {
        self.event.job_id()
    }
}

impl Serialize for EventEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error as _;

        let mut value = serde_json::to_value(&self.event).map_err(S::Error::custom)?;
        let timestamp = serde_json::to_value(self.timestamp).map_err(S::Error::custom)?;
        match value.as_object_mut() {
            Some(obj) => {
                obj.insert("timestamp".to_string(), timestamp);
            }
            None => return Err(S::Error::custom("progress event must serialize to an object")),
        }
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EventEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut value = serde_json::Value::deserialize(deserializer)?;
        let timestamp = value
            .as_object_mut()
            .and_then(|obj| obj.remove("timestamp"))
            .ok_or_else(|| D::Error::missing_field("timestamp"))?;
        let timestamp = serde_json::from_value(timestamp).map_err(D::Error::custom)?;
        let event = serde_json::from_value(value).map_err(D::Error::custom)?;
        Ok(Self { event, timestamp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wire_shape_is_flat() {
        let job_id = JobId::new();
        let env = EventEnvelope::new(ProgressEvent::JobCompleted(JobCompleted {
            job_id,
            chunks_processed: 3,
            total_chunks: 3,
            anomalies_found: 7,
        }));

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "job_completed");
        assert_eq!(json["payload"]["job_id"], job_id.to_string());
        assert_eq!(json["payload"]["anomalies_found"], 7);
        assert!(json["timestamp"].is_string());

        let back: EventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn missing_timestamp_is_rejected() {
        let raw = serde_json::json!({
            "type": "job_failed",
            "payload": {
                "job_id": JobId::new(),
                "chunks_processed": 0,
                "total_chunks": 1,
                "error": "scorer unavailable",
            }
        });
        assert!(serde_json::from_value::<EventEnvelope>(raw).is_err());
    }
}
