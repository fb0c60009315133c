use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use loglens_core::{Chunk, ChunkId, ChunkResult, DomainError, Job, JobId, JobStatus};

use super::{ChunkStore, JobStore, StoreError};

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(DomainError::conflict(format!("job {} already exists", job.id)).into());
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    async fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        error_message: Option<String>,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().unwrap();

        if to == JobStatus::Processing {
            if let Some(active) = jobs
                .values()
                .find(|j| j.status == JobStatus::Processing && j.id != id)
            {
                return Err(DomainError::conflict(format!("job {} is already processing", active.id)).into());
            }
        }

        let job = jobs.get_mut(&id).ok_or_else(|| StoreError::job_not_found(id))?;
        job.transition(to, error_message, Utc::now())?;
        Ok(job.clone())
    }

    async fn increment_processed(&self, id: JobId) -> Result<u32, StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or_else(|| StoreError::job_not_found(id))?;
        if job.status != JobStatus::Processing {
            return Err(DomainError::conflict(format!("job {id} is {}, not processing", job.status)).into());
        }
        Ok(job.record_chunk_processed()?)
    }

    async fn discard(&self, id: JobId) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.get(&id) {
            Some(job) if job.status == JobStatus::Pending => Ok(jobs.remove(&id).is_some()),
            Some(job) => Err(DomainError::conflict(format!("job {id} is {}, not pending", job.status)).into()),
            None => Ok(false),
        }
    }

    async fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();

        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn find_processing(&self) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .values()
            .find(|j| j.status == JobStatus::Processing)
            .cloned())
    }
}

/// In-memory chunk store for tests/dev.
///
/// Results are kept in one append-only vector so persistence order is preserved.
#[derive(Debug, Default)]
pub struct InMemoryChunkStore {
    chunks: RwLock<HashMap<ChunkId, Chunk>>,
    results: RwLock<Vec<ChunkResult>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn sorted(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
        chunks.sort_by_key(|c| c.chunk_number);
        chunks
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn insert_chunks(&self, new_chunks: &[Chunk]) -> Result<(), StoreError> {
        let mut chunks = self.chunks.write().unwrap();
        for (idx, c) in new_chunks.iter().enumerate() {
            let duplicate_number = chunks
                .values()
                .chain(&new_chunks[..idx])
                .any(|existing| existing.job_id == c.job_id && existing.chunk_number == c.chunk_number);
            if chunks.contains_key(&c.id) || duplicate_number {
                return Err(DomainError::conflict(format!(
                    "chunk {} of job {} already exists",
                    c.chunk_number, c.job_id
                ))
                .into());
            }
        }
        for c in new_chunks {
            chunks.insert(c.id, c.clone());
        }
        Ok(())
    }

    async fn get_chunk(&self, id: ChunkId) -> Result<Option<Chunk>, StoreError> {
        Ok(self.chunks.read().unwrap().get(&id).cloned())
    }

    async fn chunks_for_job(&self, job_id: JobId) -> Result<Vec<Chunk>, StoreError> {
        let chunks = self.chunks.read().unwrap();
        Ok(Self::sorted(
            chunks.values().filter(|c| c.job_id == job_id).cloned().collect(),
        ))
    }

    async fn unprocessed_chunks(&self, job_id: JobId) -> Result<Vec<Chunk>, StoreError> {
        let chunks = self.chunks.read().unwrap();
        Ok(Self::sorted(
            chunks
                .values()
                .filter(|c| c.job_id == job_id && !c.processed)
                .cloned()
                .collect(),
        ))
    }

    async fn mark_processed(&self, id: ChunkId) -> Result<(), StoreError> {
        let has_results = self.results.read().unwrap().iter().any(|r| r.chunk_id == id);

        let mut chunks = self.chunks.write().unwrap();
        let chunk = chunks.get_mut(&id).ok_or_else(|| StoreError::chunk_not_found(id))?;
        if !has_results {
            return Err(DomainError::validation(format!(
                "chunk {id} has no persisted results"
            ))
            .into());
        }
        chunk.processed = true;
        Ok(())
    }

    async fn append_result(&self, result: &ChunkResult) -> Result<(), StoreError> {
        if !self.chunks.read().unwrap().contains_key(&result.chunk_id) {
            return Err(StoreError::chunk_not_found(result.chunk_id));
        }
        self.results.write().unwrap().push(result.clone());
        Ok(())
    }

    async fn results_for_chunk(&self, chunk_id: ChunkId) -> Result<Vec<ChunkResult>, StoreError> {
        let results = self.results.read().unwrap();
        Ok(results
            .iter()
            .filter(|r| r.chunk_id == chunk_id)
            .cloned()
            .collect())
    }

    async fn results_for_job(&self, job_id: JobId) -> Result<Vec<ChunkResult>, StoreError> {
        let numbers: HashMap<ChunkId, u32> = self
            .chunks
            .read()
            .unwrap()
            .values()
            .filter(|c| c.job_id == job_id)
            .map(|c| (c.id, c.chunk_number))
            .collect();

        let results = self.results.read().unwrap();
        let mut out: Vec<_> = results
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        // Stable sort keeps persistence order within a chunk.
        out.sort_by_key(|r| numbers.get(&r.chunk_id).copied().unwrap_or(u32::MAX));
        Ok(out)
    }

    async fn count_anomalies(&self, job_id: JobId) -> Result<u64, StoreError> {
        let results = self.results.read().unwrap();
        Ok(results
            .iter()
            .filter(|r| r.job_id == job_id)
            .map(|r| r.anomalies.len() as u64)
            .sum())
    }

    async fn discard_chunks(&self, job_id: JobId) -> Result<u64, StoreError> {
        let mut chunks = self.chunks.write().unwrap();
        let before = chunks.len();
        chunks.retain(|_, c| c.job_id != job_id);
        self.results.write().unwrap().retain(|r| r.job_id != job_id);
        Ok((before - chunks.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loglens_core::AnomalyRecord;

    #[tokio::test]
    async fn only_one_job_may_enter_processing() {
        let store = InMemoryJobStore::new();
        let a = Job::new("a.log", 10, 1);
        let b = Job::new("b.log", 10, 1);
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();

        store.transition(a.id, JobStatus::Processing, None).await.unwrap();
        let err = store
            .transition(b.id, JobStatus::Processing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Conflict(_))));

        store.transition(a.id, JobStatus::Completed, None).await.unwrap();
        store.transition(b.id, JobStatus::Processing, None).await.unwrap();
        assert_eq!(store.find_processing().await.unwrap().map(|j| j.id), Some(b.id));
    }

    #[tokio::test]
    async fn processed_counter_is_bounded() {
        let store = InMemoryJobStore::new();
        let job = Job::new("a.log", 10, 1);
        store.insert(&job).await.unwrap();
        store.transition(job.id, JobStatus::Processing, None).await.unwrap();

        assert_eq!(store.increment_processed(job.id).await.unwrap(), 1);
        assert!(matches!(
            store.increment_processed(job.id).await,
            Err(StoreError::Domain(DomainError::LimitExceeded(_)))
        ));
    }

    #[tokio::test]
    async fn cancelled_job_does_not_advance() {
        let store = InMemoryJobStore::new();
        let job = Job::new("a.log", 10, 3);
        store.insert(&job).await.unwrap();

        assert!(matches!(
            store.increment_processed(job.id).await,
            Err(StoreError::Domain(DomainError::Conflict(_)))
        ));

        store.transition(job.id, JobStatus::Processing, None).await.unwrap();
        store.increment_processed(job.id).await.unwrap();
        store.transition(job.id, JobStatus::Cancelled, None).await.unwrap();

        assert!(matches!(
            store.increment_processed(job.id).await,
            Err(StoreError::Domain(DomainError::Conflict(_)))
        ));
        assert_eq!(store.get(job.id).await.unwrap().unwrap().chunks_processed, 1);
    }

    #[tokio::test]
    async fn only_pending_jobs_are_discarded() {
        let jobs = InMemoryJobStore::new();
        let chunks = InMemoryChunkStore::new();
        let pending = Job::new("a.log", 10, 2);
        let running = Job::new("b.log", 10, 1);
        jobs.insert(&pending).await.unwrap();
        jobs.insert(&running).await.unwrap();
        jobs.transition(running.id, JobStatus::Processing, None).await.unwrap();
        chunks
            .insert_chunks(&[Chunk::new(pending.id, 0, "a"), Chunk::new(pending.id, 1, "b")])
            .await
            .unwrap();
        chunks.insert_chunks(&[Chunk::new(running.id, 0, "c")]).await.unwrap();

        assert_eq!(chunks.discard_chunks(pending.id).await.unwrap(), 2);
        assert!(jobs.discard(pending.id).await.unwrap());
        assert!(jobs.get(pending.id).await.unwrap().is_none());
        assert!(!jobs.discard(pending.id).await.unwrap());

        assert!(jobs.discard(running.id).await.is_err());
        assert_eq!(chunks.chunks_for_job(running.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chunk_cannot_be_marked_processed_without_results() {
        let store = InMemoryChunkStore::new();
        let job_id = JobId::new();
        let chunk = Chunk::new(job_id, 0, "line");
        store.insert_chunks(std::slice::from_ref(&chunk)).await.unwrap();

        assert!(store.mark_processed(chunk.id).await.is_err());

        store
            .append_result(&ChunkResult::new(chunk.id, job_id, vec![], 0.01))
            .await
            .unwrap();
        store.mark_processed(chunk.id).await.unwrap();
        assert!(store.unprocessed_chunks(job_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_chunk_numbers_are_rejected() {
        let store = InMemoryChunkStore::new();
        let job_id = JobId::new();
        let chunks = vec![Chunk::new(job_id, 0, "a"), Chunk::new(job_id, 0, "b")];
        assert!(store.insert_chunks(&chunks).await.is_err());
        assert!(store.chunks_for_job(job_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn results_are_ordered_by_chunk_then_persistence() {
        let store = InMemoryChunkStore::new();
        let job_id = JobId::new();
        let c0 = Chunk::new(job_id, 0, "a");
        let c1 = Chunk::new(job_id, 1, "b");
        store.insert_chunks(&[c1.clone(), c0.clone()]).await.unwrap();

        let anomaly = |c: &Chunk| AnomalyRecord::new(c.id, "ERROR", -0.06, "x");
        store.append_result(&ChunkResult::new(c1.id, job_id, vec![anomaly(&c1)], 0.1)).await.unwrap();
        store.append_result(&ChunkResult::new(c0.id, job_id, vec![anomaly(&c0)], 0.2)).await.unwrap();
        store.append_result(&ChunkResult::new(c0.id, job_id, vec![], 0.3)).await.unwrap();

        let results = store.results_for_job(job_id).await.unwrap();
        let times: Vec<f64> = results.iter().map(|r| r.processing_time).collect();
        assert_eq!(times, vec![0.2, 0.3, 0.1]);
        assert_eq!(store.count_anomalies(job_id).await.unwrap(), 2);
    }
}
