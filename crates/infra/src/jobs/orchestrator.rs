//! Job orchestrator: single-flight job execution over sequential chunks.
//!
//! ## Lease
//!
//! At most one job runs at a time. The orchestrator holds an in-process lease for the
//! job it is driving, and the job store refuses a second `processing` job, which covers
//! several orchestrator instances sharing one store. A submission while the lease is
//! held is rejected with [`PipelineError::Busy`]; nothing is queued.
//!
//! ## Cancellation
//!
//! Each running job owns a [`CancellationToken`]. `cancel` marks the job `Cancelled`
//! and fires the token; the processor observes it at the next sub-batch boundary
//! and the run loop at the next chunk boundary.
//!
//! A cancel handled by another instance only changes the stored status. The run
//! watches the store every `poll_interval` and fires its own token once the job
//! leaves `Processing`; the run loop also re-reads the status at each chunk
//! boundary, and the store refuses to count chunks of a job that is not processing.
//!
//! ## Rejected submissions
//!
//! Job and chunk records are written before the job can enter `Processing`. When a
//! later step fails, both are discarded, so a rejected submission leaves nothing behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use loglens_ai::{ExplanationProvider, Scorer};
use loglens_core::{
    AnomalyRecord, Chunk, ChunkResult, DomainError, Job, JobId, JobStatus, split_into_chunks,
    validate_upload,
};
use loglens_events::{BroadcastStore, ChunkProgress, JobCompleted, JobFailed, JobState, ProgressEvent};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::jobs::processor::{ChunkOutcome, ChunkProcessor};
use crate::progress::{JobUpdates, ProgressPublisher, SubscriptionGateway};
use crate::store::{ChunkStore, JobStore, StoreError};

/// Status query answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub filename: String,
    pub status: JobStatus,
    /// `chunks_processed / total_chunks`, in `[0, 1]`.
    pub progress: f64,
    pub chunks_processed: u32,
    pub total_chunks: u32,
    pub anomalies_found: u64,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub resumed_from: Option<JobId>,
}

/// Summary of a completed job with its aggregated anomalies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub filename: String,
    pub total_lines: usize,
    pub total_chunks: u32,
    pub chunks_processed: u32,
    pub anomalies_found: usize,
    /// Seconds spent across all persisted sub-batches.
    pub processing_time: f64,
    pub completed_at: Option<DateTime<Utc>>,
    pub anomalies: Vec<AnomalyRecord>,
}

#[derive(Debug)]
enum RunOutcome {
    Completed { anomalies_found: u64 },
    Cancelled,
}

#[derive(Debug)]
struct Lease {
    job_id: JobId,
    cancel: CancellationToken,
}

struct Inner {
    jobs: Arc<dyn JobStore>,
    chunks: Arc<dyn ChunkStore>,
    processor: ChunkProcessor,
    publisher: Arc<ProgressPublisher>,
    gateway: SubscriptionGateway,
    config: PipelineConfig,
    lease: Mutex<Option<Lease>>,
    handles: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

/// Entry point of the pipeline: ingestion, status, streaming, cancel and resume.
///
/// Cheap to clone; clones share the same lease.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        chunks: Arc<dyn ChunkStore>,
        scorer: Arc<dyn Scorer>,
        explainer: Arc<dyn ExplanationProvider>,
        broadcast: Arc<dyn BroadcastStore>,
        config: PipelineConfig,
    ) -> Self {
        let publisher = Arc::new(ProgressPublisher::new(broadcast.clone(), config.state_ttl));
        let gateway = SubscriptionGateway::new(broadcast, config.poll_interval);
        let processor = ChunkProcessor::new(
            chunks.clone(),
            scorer,
            explainer,
            publisher.clone(),
            config.clone(),
        );
        Self {
            inner: Arc::new(Inner {
                jobs,
                chunks,
                processor,
                publisher,
                gateway,
                config,
                lease: Mutex::new(None),
                handles: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Job currently holding the lease, if any.
    pub fn active_job(&self) -> Option<JobId> {
        self.inner.lease.lock().unwrap().as_ref().map(|l| l.job_id)
    }

    /// Validate and split an upload, create its job and chunks, and start processing.
    ///
    /// Returns as soon as the records exist; processing continues in the background
    /// and its errors surface only through [`status`](Self::status) and the stream.
    pub async fn submit(&self, filename: &str, bytes: &[u8]) -> PipelineResult<Job> {
        let content = validate_upload(filename, bytes, self.inner.config.max_upload_bytes)?;
        let pieces = split_into_chunks(&content, self.inner.config.chunk_bytes);
        let total_chunks = u32::try_from(pieces.len())
            .map_err(|_| PipelineError::Validation("upload splits into too many chunks".into()))?;

        let job = Job::new(filename.trim(), bytes.len() as u64, total_chunks);
        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(n, data)| Chunk::new(job.id, n as u32, data))
            .collect();

        self.start(job, chunks).await
    }

    /// Start a new job over the unprocessed chunks of a failed or cancelled job.
    ///
    /// Chunks are renumbered from 0; the old job is left as it is.
    pub async fn resume(&self, job_id: JobId) -> PipelineResult<Job> {
        let previous = self.load(job_id).await?;
        if !matches!(previous.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Err(PipelineError::InvalidState {
                job_id,
                status: previous.status,
                reason: "only failed or cancelled jobs can be resumed".into(),
            });
        }

        let remaining = self.inner.chunks.unprocessed_chunks(job_id).await?;
        if remaining.is_empty() {
            return Err(PipelineError::InvalidState {
                job_id,
                status: previous.status,
                reason: "no unprocessed chunks left".into(),
            });
        }

        let total_size = remaining.iter().map(|c| c.size).sum();
        let job = Job::new(previous.filename.clone(), total_size, remaining.len() as u32)
            .resumed_from(job_id);
        let chunks = remaining
            .into_iter()
            .enumerate()
            .map(|(n, c)| Chunk::new(job.id, n as u32, c.data))
            .collect();

        info!(job_id = %job.id, resumed_from = %job_id, "resuming job");
        self.start(job, chunks).await
    }

    /// Mark a processing job `Cancelled`. In-flight work stops at the next sub-batch boundary.
    pub async fn cancel(&self, job_id: JobId) -> PipelineResult<Job> {
        let job = self.load(job_id).await?;
        if job.status != JobStatus::Processing {
            return Err(PipelineError::InvalidState {
                job_id,
                status: job.status,
                reason: "only processing jobs can be cancelled".into(),
            });
        }

        let job = match self
            .inner
            .jobs
            .transition(job_id, JobStatus::Cancelled, None)
            .await
        {
            Ok(job) => job,
            Err(StoreError::Domain(DomainError::InvalidTransition { from, .. })) => {
                return Err(PipelineError::InvalidState {
                    job_id,
                    status: from,
                    reason: "job finished before it could be cancelled".into(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(lease) = self.inner.lease.lock().unwrap().as_ref() {
            if lease.job_id == job_id {
                lease.cancel.cancel();
            }
        }
        self.refresh_state(&job).await;
        info!(job_id = %job_id, "job cancelled");
        Ok(job)
    }

    pub async fn status(&self, job_id: JobId) -> PipelineResult<JobStatusView> {
        let job = self.load(job_id).await?;
        let anomalies_found = self.inner.chunks.count_anomalies(job_id).await?;
        Ok(JobStatusView {
            job_id: job.id,
            progress: job.progress(),
            filename: job.filename,
            status: job.status,
            chunks_processed: job.chunks_processed,
            total_chunks: job.total_chunks,
            anomalies_found,
            error_message: job.error_message,
            started_at: job.started_at,
            completed_at: job.completed_at,
            resumed_from: job.resumed_from,
        })
    }

    pub async fn results(&self, job_id: JobId) -> PipelineResult<Vec<ChunkResult>> {
        self.load(job_id).await?;
        Ok(self.inner.chunks.results_for_job(job_id).await?)
    }

    /// Completed jobs, newest first, with their anomalies.
    pub async fn reports(&self, limit: usize) -> PipelineResult<Vec<JobReport>> {
        let jobs = self
            .inner
            .jobs
            .list_by_status(Some(JobStatus::Completed), limit)
            .await?;

        let mut reports = Vec::with_capacity(jobs.len());
        for job in jobs {
            let chunks = self.inner.chunks.chunks_for_job(job.id).await?;
            let results = self.inner.chunks.results_for_job(job.id).await?;
            let processing_time = results.iter().map(|r| r.processing_time).sum();
            let anomalies: Vec<AnomalyRecord> =
                results.into_iter().flat_map(|r| r.anomalies).collect();

            reports.push(JobReport {
                job_id: job.id,
                filename: job.filename,
                total_lines: chunks.iter().map(Chunk::line_count).sum(),
                total_chunks: job.total_chunks,
                chunks_processed: job.chunks_processed,
                anomalies_found: anomalies.len(),
                processing_time,
                completed_at: job.completed_at,
                anomalies,
            });
        }
        Ok(reports)
    }

    /// Stream a job's progress, starting with its last known state.
    pub async fn subscribe(&self, job_id: JobId) -> PipelineResult<JobUpdates> {
        let job = self.load(job_id).await?;
        let anomalies_found = self.inner.chunks.count_anomalies(job_id).await?;
        let fallback = JobState::from_job(&job, anomalies_found);
        Ok(self.inner.gateway.subscribe(job_id, fallback).await?)
    }

    /// Wait for the background run of `job_id` to finish. Returns immediately if none.
    pub async fn wait(&self, job_id: JobId) {
        let handle = self.inner.handles.lock().unwrap().remove(&job_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(job_id = %job_id, error = %e, "job task panicked");
            }
        }
    }

    async fn load(&self, job_id: JobId) -> PipelineResult<Job> {
        self.inner
            .jobs
            .get(job_id)
            .await?
            .ok_or(PipelineError::NotFound(job_id))
    }

    async fn start(&self, job: Job, chunks: Vec<Chunk>) -> PipelineResult<Job> {
        let job_id = job.id;
        let cancel = CancellationToken::new();
        {
            let mut lease = self.inner.lease.lock().unwrap();
            if let Some(active) = lease.as_ref() {
                info!(job_id = %job_id, active = %active.job_id, "submission rejected; another job is processing");
                return Err(PipelineError::Busy {
                    active: active.job_id,
                });
            }
            *lease = Some(Lease {
                job_id,
                cancel: cancel.clone(),
            });
        }

        let job = match self.create_records(job, &chunks).await {
            Ok(job) => job,
            Err(e) => {
                self.inner.release(job_id);
                return Err(e);
            }
        };

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run(job_id, cancel).await });
        let mut handles = self.inner.handles.lock().unwrap();
        handles.retain(|_, h| !h.is_finished());
        handles.insert(job_id, handle);

        info!(job_id = %job_id, total_chunks = job.total_chunks, filename = %job.filename, "job submitted");
        Ok(job)
    }

    /// Create the job and chunk records and move the job to `Processing`.
    ///
    /// On any failure after the job row is written, the job and its chunks are discarded.
    async fn create_records(&self, job: Job, chunks: &[Chunk]) -> PipelineResult<Job> {
        let jobs = &self.inner.jobs;
        if let Some(active) = jobs.find_processing().await? {
            return Err(PipelineError::Busy { active: active.id });
        }

        jobs.insert(&job).await?;
        match self.enter_processing(job.id, chunks).await {
            Ok(job) => {
                self.refresh_state(&job).await;
                Ok(job)
            }
            Err(e) => {
                self.inner.discard(job.id).await;
                Err(e)
            }
        }
    }

    async fn enter_processing(&self, job_id: JobId, chunks: &[Chunk]) -> PipelineResult<Job> {
        let jobs = &self.inner.jobs;
        self.inner.chunks.insert_chunks(chunks).await?;

        match jobs.transition(job_id, JobStatus::Processing, None).await {
            Ok(job) => Ok(job),
            Err(StoreError::Domain(DomainError::Conflict(msg))) => {
                // Lost the store-level race to another orchestrator instance.
                Err(match jobs.find_processing().await? {
                    Some(active) => PipelineError::Busy { active: active.id },
                    None => StoreError::Domain(DomainError::Conflict(msg)).into(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh_state(&self, job: &Job) {
        self.inner.refresh_state(job).await
    }
}

impl Inner {
    fn release(&self, job_id: JobId) {
        let mut lease = self.lease.lock().unwrap();
        if lease.as_ref().is_some_and(|l| l.job_id == job_id) {
            *lease = None;
        }
    }

    /// Best-effort removal of a submission that never reached `Processing`.
    async fn discard(&self, job_id: JobId) {
        if let Err(e) = self.chunks.discard_chunks(job_id).await {
            warn!(job_id = %job_id, error = %e, "failed to discard chunks of rejected submission");
        }
        match self.jobs.discard(job_id).await {
            Ok(_) => info!(job_id = %job_id, "rejected submission discarded"),
            Err(e) => warn!(job_id = %job_id, error = %e, "failed to discard rejected submission"),
        }
    }

    async fn refresh_state(&self, job: &Job) {
        let anomalies_found = match self.chunks.count_anomalies(job.id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "could not count anomalies for cached state");
                0
            }
        };
        if let Err(e) = self
            .publisher
            .set_state(JobState::from_job(job, anomalies_found))
            .await
        {
            warn!(job_id = %job.id, error = %e, "failed to refresh cached job state");
        }
    }

    async fn publish(&self, event: ProgressEvent) {
        let job_id = event.job_id();
        if let Err(e) = self.publisher.publish(event).await {
            warn!(job_id = %job_id, error = %e, "failed to publish progress event");
        }
    }

    /// Background driver for one job. Always releases the lease.
    async fn run(&self, job_id: JobId, cancel: CancellationToken) {
        let watcher = tokio::spawn(watch_stored_status(
            self.jobs.clone(),
            job_id,
            cancel.clone(),
            self.config.poll_interval,
        ));

        match self.run_chunks(job_id, &cancel).await {
            Ok(RunOutcome::Completed { anomalies_found }) => {
                match self.jobs.transition(job_id, JobStatus::Completed, None).await {
                    Ok(job) => {
                        self.publish(ProgressEvent::JobCompleted(JobCompleted {
                            job_id,
                            chunks_processed: job.chunks_processed,
                            total_chunks: job.total_chunks,
                            anomalies_found,
                        }))
                        .await;
                        info!(job_id = %job_id, anomalies = anomalies_found, "job completed");
                    }
                    Err(e) => self.settle_after_race(job_id, e).await,
                }
            }
            Ok(RunOutcome::Cancelled) => {
                match self.jobs.transition(job_id, JobStatus::Cancelled, None).await {
                    Ok(job) => {
                        self.refresh_state(&job).await;
                        info!(job_id = %job_id, "job cancelled");
                    }
                    Err(e) => self.settle_after_race(job_id, e).await,
                }
            }
            Err(failure) => {
                let message = failure.to_string();
                error!(job_id = %job_id, error = %message, "job failed");
                match self
                    .jobs
                    .transition(job_id, JobStatus::Failed, Some(message.clone()))
                    .await
                {
                    Ok(job) => {
                        self.publish(ProgressEvent::JobFailed(JobFailed {
                            job_id,
                            chunks_processed: job.chunks_processed,
                            total_chunks: job.total_chunks,
                            error: message,
                        }))
                        .await;
                    }
                    Err(e) => self.settle_after_race(job_id, e).await,
                }
            }
        }
        watcher.abort();
        self.release(job_id);
        self.publisher.forget(job_id);
    }

    /// The final transition was refused, normally because `cancel` got there first.
    async fn settle_after_race(&self, job_id: JobId, err: StoreError) {
        match self.jobs.get(job_id).await {
            Ok(Some(job)) if job.status.is_terminal() => {
                info!(job_id = %job_id, status = %job.status, "job already settled");
                self.refresh_state(&job).await;
            }
            _ => error!(job_id = %job_id, error = %err, "could not record final job status"),
        }
    }

    async fn run_chunks(
        &self,
        job_id: JobId,
        cancel: &CancellationToken,
    ) -> PipelineResult<RunOutcome> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(PipelineError::NotFound(job_id))?;
        let mut anomalies_found = self.chunks.count_anomalies(job_id).await?;

        for chunk in self.chunks.unprocessed_chunks(job_id).await? {
            if cancel.is_cancelled() || !self.still_processing(job_id).await? {
                return Ok(RunOutcome::Cancelled);
            }
            info!(job_id = %job_id, chunk_id = %chunk.id, chunk_number = chunk.chunk_number, "chunk started");

            let summary = match self.processor.process(&chunk, cancel).await? {
                ChunkOutcome::Processed(summary) => summary,
                ChunkOutcome::Cancelled { .. } => return Ok(RunOutcome::Cancelled),
            };

            let chunks_processed = match self.jobs.increment_processed(job_id).await {
                Ok(n) => n,
                Err(StoreError::Domain(DomainError::Conflict(msg))) => {
                    if self.still_processing(job_id).await? {
                        return Err(StoreError::Domain(DomainError::Conflict(msg)).into());
                    }
                    info!(job_id = %job_id, chunk_number = chunk.chunk_number, "job left processing before the chunk was counted");
                    return Ok(RunOutcome::Cancelled);
                }
                Err(e) => return Err(e.into()),
            };
            anomalies_found += summary.anomalies.len() as u64;
            info!(
                job_id = %job_id,
                chunk_number = chunk.chunk_number,
                anomalies = summary.anomalies.len(),
                capped = summary.capped,
                "chunk finished"
            );

            self.publish(ProgressEvent::ChunkProgress(ChunkProgress {
                job_id,
                chunk_id: chunk.id,
                chunk_number: chunk.chunk_number,
                chunks_processed,
                total_chunks: job.total_chunks,
                chunk_anomalies: summary.anomalies.len(),
                anomalies_found,
                processing_time: summary.processing_time,
            }))
            .await;
        }

        Ok(RunOutcome::Completed { anomalies_found })
    }

    async fn still_processing(&self, job_id: JobId) -> PipelineResult<bool> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(PipelineError::NotFound(job_id))?;
        Ok(job.status == JobStatus::Processing)
    }
}

/// Fire `cancel` once the stored job leaves `Processing`.
async fn watch_stored_status(
    jobs: Arc<dyn JobStore>,
    job_id: JobId,
    cancel: CancellationToken,
    every: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(every) => {}
        }
        match jobs.get(job_id).await {
            Ok(Some(job)) if job.status == JobStatus::Processing => {}
            Ok(found) => {
                info!(
                    job_id = %job_id,
                    status = ?found.map(|j| j.status),
                    "job left processing outside this run; stopping"
                );
                cancel.cancel();
                return;
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "could not check stored job status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use loglens_ai::{FallbackExplanationProvider, KeywordScorer};
    use loglens_events::InMemoryBroadcastStore;

    use crate::store::{InMemoryChunkStore, InMemoryJobStore};

    /// In-memory job store that can hide processing jobs from `find_processing`
    /// and refuse to record completion.
    #[derive(Default)]
    struct ScriptedJobStore {
        inner: InMemoryJobStore,
        hide_processing: bool,
        refuse_completion: bool,
    }

    #[async_trait]
    impl JobStore for ScriptedJobStore {
        async fn insert(&self, job: &Job) -> Result<(), StoreError> {
            self.inner.insert(job).await
        }

        async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
            self.inner.get(id).await
        }

        async fn transition(
            &self,
            id: JobId,
            to: JobStatus,
            error_message: Option<String>,
        ) -> Result<Job, StoreError> {
            if self.refuse_completion && to == JobStatus::Completed {
                return Err(StoreError::Storage("connection reset".into()));
            }
            self.inner.transition(id, to, error_message).await
        }

        async fn increment_processed(&self, id: JobId) -> Result<u32, StoreError> {
            self.inner.increment_processed(id).await
        }

        async fn discard(&self, id: JobId) -> Result<bool, StoreError> {
            self.inner.discard(id).await
        }

        async fn list_by_status(
            &self,
            status: Option<JobStatus>,
            limit: usize,
        ) -> Result<Vec<Job>, StoreError> {
            self.inner.list_by_status(status, limit).await
        }

        async fn find_processing(&self) -> Result<Option<Job>, StoreError> {
            if self.hide_processing {
                return Ok(None);
            }
            self.inner.find_processing().await
        }
    }

    fn orchestrator(config: PipelineConfig) -> JobOrchestrator {
        JobOrchestrator::new(
            InMemoryJobStore::arc(),
            InMemoryChunkStore::arc(),
            Arc::new(KeywordScorer),
            Arc::new(FallbackExplanationProvider),
            Arc::new(InMemoryBroadcastStore::new()),
            config.with_throttle(Duration::ZERO),
        )
    }

    #[tokio::test]
    async fn invalid_upload_creates_nothing() {
        let o = orchestrator(PipelineConfig::default());
        let err = o.submit("app.log", b"   \n").await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(o.reports(10).await.unwrap().is_empty());
        assert_eq!(o.active_job(), None);
    }

    #[tokio::test]
    async fn chunks_are_numbered_contiguously() {
        let o = orchestrator(PipelineConfig::default().with_chunk_bytes(32));
        let content = (0..20).map(|i| format!("INFO line {i}")).collect::<Vec<_>>().join("\n");
        let job = o.submit("app.log", content.as_bytes()).await.unwrap();
        o.wait(job.id).await;

        let chunks = o.inner.chunks.chunks_for_job(job.id).await.unwrap();
        assert_eq!(chunks.len() as u32, job.total_chunks);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_number, i as u32);
            assert!(c.processed);
        }

        let status = o.status(job.id).await.unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.chunks_processed, job.total_chunks);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let o = orchestrator(PipelineConfig::default());
        let missing = JobId::new();
        assert!(matches!(o.status(missing).await, Err(PipelineError::NotFound(id)) if id == missing));
        assert!(matches!(o.cancel(missing).await, Err(PipelineError::NotFound(_))));
        assert!(matches!(o.resume(missing).await, Err(PipelineError::NotFound(_))));
    }

    #[tokio::test]
    async fn submission_losing_the_store_race_is_discarded() {
        let jobs = Arc::new(ScriptedJobStore {
            hide_processing: true,
            ..ScriptedJobStore::default()
        });
        let chunks = InMemoryChunkStore::arc();
        let o = JobOrchestrator::new(
            jobs.clone(),
            chunks.clone(),
            Arc::new(KeywordScorer),
            Arc::new(FallbackExplanationProvider),
            Arc::new(InMemoryBroadcastStore::new()),
            PipelineConfig::default().with_throttle(Duration::ZERO),
        );

        // Another instance already runs a job that this one cannot see up front.
        let elsewhere = Job::new("elsewhere.log", 10, 1);
        jobs.insert(&elsewhere).await.unwrap();
        jobs.transition(elsewhere.id, JobStatus::Processing, None).await.unwrap();

        let err = o.submit("app.log", b"ERROR x\nINFO y").await.unwrap_err();
        assert!(matches!(err, PipelineError::Store(StoreError::Domain(DomainError::Conflict(_)))));

        let left = jobs.list_by_status(None, 10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, elsewhere.id);
        assert_eq!(o.active_job(), None);
        assert!(o.inner.handles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_state_is_dropped_even_when_completion_cannot_be_recorded() {
        let jobs = Arc::new(ScriptedJobStore {
            refuse_completion: true,
            ..ScriptedJobStore::default()
        });
        let o = JobOrchestrator::new(
            jobs.clone(),
            InMemoryChunkStore::arc(),
            Arc::new(KeywordScorer),
            Arc::new(FallbackExplanationProvider),
            Arc::new(InMemoryBroadcastStore::new()),
            PipelineConfig::default().with_throttle(Duration::ZERO),
        );

        let job = o.submit("app.log", b"ERROR x\nINFO y").await.unwrap();
        o.wait(job.id).await;

        assert_eq!(jobs.get(job.id).await.unwrap().unwrap().status, JobStatus::Processing);
        assert!(!o.inner.publisher.is_tracking(job.id));
        assert_eq!(o.active_job(), None);
    }

    #[tokio::test]
    async fn completed_job_cannot_be_cancelled_or_resumed() {
        let o = orchestrator(PipelineConfig::default());
        let job = o.submit("app.log", b"INFO ok").await.unwrap();
        o.wait(job.id).await;

        assert!(matches!(o.cancel(job.id).await, Err(PipelineError::InvalidState { .. })));
        assert!(matches!(o.resume(job.id).await, Err(PipelineError::InvalidState { .. })));
        assert_eq!(o.active_job(), None);
    }
}
