//! Job record and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Job lifecycle status.
///
/// Permitted transitions: `Pending -> Processing -> {Completed | Failed | Cancelled}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Cancelled)
        )
    }

    /// Statuses from which `self` may be entered.
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[],
            JobStatus::Processing => &[JobStatus::Pending],
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                &[JobStatus::Processing]
            }
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown job status: {s}")))
    }
}

/// A unit of work covering every chunk derived from one submitted file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub filename: String,
    /// Size of the submitted content in bytes.
    pub total_size: u64,
    pub total_chunks: u32,
    pub chunks_processed: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Set when this job was created by resuming the unprocessed chunks of another job.
    pub resumed_from: Option<JobId>,
}

impl Job {
    pub fn new(filename: impl Into<String>, total_size: u64, total_chunks: u32) -> Self {
        Self {
            id: JobId::new(),
            filename: filename.into(),
            total_size,
            total_chunks,
            chunks_processed: 0,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            resumed_from: None,
        }
    }

    pub fn resumed_from(mut self, previous: JobId) -> Self {
        self.resumed_from = Some(previous);
        self
    }

    /// Fraction of chunks processed in `[0, 1]`. An empty job counts as done only once completed.
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return if self.status == JobStatus::Completed { 1.0 } else { 0.0 };
        }
        f64::from(self.chunks_processed) / f64::from(self.total_chunks)
    }

    /// Apply a status transition, stamping timestamps and the error message.
    pub fn transition(
        &mut self,
        next: JobStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        match next {
            JobStatus::Processing => self.started_at = Some(at),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                self.completed_at = Some(at)
            }
            JobStatus::Pending => {}
        }
        if next == JobStatus::Failed {
            self.error_message = error_message;
        }
        self.status = next;
        Ok(())
    }

    /// Advance `chunks_processed` by one, never past `total_chunks`.
    pub fn record_chunk_processed(&mut self) -> DomainResult<u32> {
        if self.chunks_processed >= self.total_chunks {
            return Err(DomainError::limit(format!(
                "job {} already processed {}/{} chunks",
                self.id, self.chunks_processed, self.total_chunks
            )));
        }
        self.chunks_processed += 1;
        Ok(self.chunks_processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut job = Job::new("app.log", 120, 2);
        assert_eq!(job.status, JobStatus::Pending);

        let now = Utc::now();
        job.transition(JobStatus::Processing, None, now).unwrap();
        assert_eq!(job.started_at, Some(now));

        job.record_chunk_processed().unwrap();
        job.record_chunk_processed().unwrap();
        assert_eq!(job.progress(), 1.0);

        job.transition(JobStatus::Completed, None, now).unwrap();
        assert!(job.status.is_terminal());
        assert_eq!(job.completed_at, Some(now));
    }

    #[test]
    fn rejects_transitions_outside_the_state_machine() {
        let mut job = Job::new("app.log", 10, 1);
        let err = job
            .transition(JobStatus::Completed, None, Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed
            }
        );

        job.transition(JobStatus::Processing, None, Utc::now()).unwrap();
        job.transition(JobStatus::Failed, Some("boom".into()), Utc::now())
            .unwrap();
        assert_eq!(job.error_message.as_deref(), Some("boom"));
        assert!(job
            .transition(JobStatus::Processing, None, Utc::now())
            .is_err());
    }

    #[test]
    fn chunks_processed_is_bounded() {
        let mut job = Job::new("app.log", 10, 1);
        job.record_chunk_processed().unwrap();
        assert!(matches!(
            job.record_chunk_processed(),
            Err(DomainError::LimitExceeded(_))
        ));
        assert_eq!(job.chunks_processed, 1);
    }

    #[test]
    fn predecessors_agree_with_can_transition_to() {
        for to in JobStatus::ALL {
            for from in JobStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    to.predecessors().contains(&from),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn status_parses_from_wire_name() {
        assert_eq!("cancelled".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
        assert!("running".parse::<JobStatus>().is_err());
    }
}
