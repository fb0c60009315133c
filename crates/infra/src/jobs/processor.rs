//! Chunk processor: score, cap, explain, and persist a chunk one sub-batch at a time.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use loglens_ai::{ExplanationProvider, MAX_EXPLAIN_BATCH, Scorer, ScorerError, explain_or_fallback};
use loglens_core::{AnomalyRecord, Chunk, ChunkResult};
use loglens_events::{BatchProgress, ProgressEvent};

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::progress::ProgressPublisher;
use crate::store::ChunkStore;

/// What happened to a chunk handed to [`ChunkProcessor::process`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// Results persisted and the chunk is marked processed.
    Processed(ChunkSummary),
    /// Stopped at a sub-batch boundary; persisted sub-batches are kept and the
    /// chunk stays unprocessed.
    Cancelled { persisted_batches: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSummary {
    /// Every anomaly persisted for the chunk, in line order.
    pub anomalies: Vec<AnomalyRecord>,
    pub persisted_batches: usize,
    pub total_lines: usize,
    /// Lines handed to the scorer before the chunk finished or hit the anomaly cap.
    pub lines_scored: usize,
    pub capped: bool,
    /// Seconds spent on the chunk.
    pub processing_time: f64,
}

/// Drives one chunk through scoring and explanation.
///
/// Sub-batches run strictly in sequence, so at most one explanation call is in flight.
pub struct ChunkProcessor {
    chunks: Arc<dyn ChunkStore>,
    scorer: Arc<dyn Scorer>,
    explainer: Arc<dyn ExplanationProvider>,
    publisher: Arc<ProgressPublisher>,
    config: PipelineConfig,
}

impl ChunkProcessor {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        scorer: Arc<dyn Scorer>,
        explainer: Arc<dyn ExplanationProvider>,
        publisher: Arc<ProgressPublisher>,
        mut config: PipelineConfig,
    ) -> Self {
        config.sub_batch_lines = config.sub_batch_lines.max(1);
        config.explain_batch = config.explain_batch.clamp(1, MAX_EXPLAIN_BATCH);
        Self {
            chunks,
            scorer,
            explainer,
            publisher,
            config,
        }
    }

    /// Process `chunk`, persisting one [`ChunkResult`] per sub-batch before starting the next.
    ///
    /// A scorer or store failure aborts with an error and leaves the chunk unprocessed;
    /// sub-batches persisted before the failure remain.
    pub async fn process(
        &self,
        chunk: &Chunk,
        cancel: &CancellationToken,
    ) -> PipelineResult<ChunkOutcome> {
        let started = Instant::now();
        let lines: Vec<&str> = chunk.lines().collect();
        let total_lines = lines.len();
        let cap = self.config.anomaly_cap;

        let mut anomalies: Vec<AnomalyRecord> = Vec::new();
        let mut persisted_batches = 0;
        let mut lines_scored = 0;
        let mut capped = false;

        for batch in lines.chunks(self.config.sub_batch_lines) {
            if cancel.is_cancelled() {
                info!(chunk_id = %chunk.id, persisted_batches, "chunk interrupted by cancellation");
                return Ok(ChunkOutcome::Cancelled { persisted_batches });
            }
            if anomalies.len() >= cap {
                capped = true;
                break;
            }

            let batch_started = Instant::now();
            let mut flagged = self.score_batch(batch).await?;
            lines_scored += batch.len();

            let room = cap - anomalies.len();
            if flagged.len() >= room {
                if flagged.len() > room {
                    info!(
                        chunk_id = %chunk.id,
                        cap,
                        dropped = flagged.len() - room,
                        "anomaly cap reached; remaining lines are skipped"
                    );
                }
                flagged.truncate(room);
                capped = true;
            }

            let mut explanations = Vec::with_capacity(flagged.len());
            for micro in flagged.chunks(self.config.explain_batch) {
                explanations.extend(explain_or_fallback(&*self.explainer, micro).await);
            }

            let records: Vec<AnomalyRecord> = flagged
                .into_iter()
                .zip(explanations)
                .map(|((line, score), explanation)| AnomalyRecord::new(chunk.id, line, score, explanation))
                .collect();

            let result = ChunkResult::new(
                chunk.id,
                chunk.job_id,
                records,
                batch_started.elapsed().as_secs_f64(),
            );
            self.chunks.append_result(&result).await?;
            persisted_batches += 1;
            debug!(
                chunk_id = %chunk.id,
                batch = persisted_batches,
                anomalies = result.anomalies.len(),
                "sub-batch persisted"
            );

            let progress = lines_scored as f64 / total_lines as f64 * 100.0;
            let event = ProgressEvent::BatchProgress(BatchProgress {
                job_id: chunk.job_id,
                chunk_id: chunk.id,
                chunk_number: chunk.chunk_number,
                progress,
                lines_processed: lines_scored,
                total_lines,
                anomalies: result.anomalies.clone(),
            });
            if let Err(e) = self.publisher.publish(event).await {
                warn!(chunk_id = %chunk.id, error = %e, "failed to publish batch progress");
            }
            anomalies.extend(result.anomalies);

            if capped {
                break;
            }
            self.throttle(cancel).await;
        }

        if persisted_batches == 0 {
            // Empty or zero-cap chunk: a processed chunk always owns at least one result.
            let result = ChunkResult::new(chunk.id, chunk.job_id, Vec::new(), 0.0);
            self.chunks.append_result(&result).await?;
            persisted_batches = 1;
        }

        self.chunks.mark_processed(chunk.id).await?;

        Ok(ChunkOutcome::Processed(ChunkSummary {
            anomalies,
            persisted_batches,
            total_lines,
            lines_scored,
            capped,
            processing_time: started.elapsed().as_secs_f64(),
        }))
    }

    /// Score the non-blank lines of `batch`, returning the anomalous `(line, score)` pairs in order.
    async fn score_batch(&self, batch: &[&str]) -> Result<Vec<(String, f64)>, ScorerError> {
        let candidates: Vec<String> = batch
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.to_string())
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let scores = self.scorer.score(&candidates).await?;
        if scores.len() != candidates.len() {
            return Err(ScorerError::LengthMismatch {
                expected: candidates.len(),
                got: scores.len(),
            });
        }

        Ok(candidates
            .into_iter()
            .zip(scores)
            .filter(|(_, s)| s.is_anomaly)
            .map(|(line, s)| (line, s.score))
            .collect())
    }

    async fn throttle(&self, cancel: &CancellationToken) {
        if self.config.throttle.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.config.throttle) => {}
            _ = cancel.cancelled() => {}
        }
    }
}
