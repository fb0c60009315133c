//! Progress broadcast: publishing job events and relaying them to subscribers.
//!
//! Every publish first refreshes the cached [`JobState`] for the job, then sends the
//! event on the job topic. A subscriber subscribes before reading the cached state,
//! so it may see an event twice (once folded into the snapshot, once live) but never
//! misses one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use loglens_core::JobId;
use loglens_events::{
    BroadcastError, BroadcastStore, EventEnvelope, JobState, ProgressEvent, RecvTimeoutError,
    job_state_key, job_topic,
};

/// Publishes progress events for jobs and keeps their cached state fresh.
pub struct ProgressPublisher {
    broadcast: Arc<dyn BroadcastStore>,
    state_ttl: Duration,
    /// Last state written per in-flight job; dropped on a terminal state or [`forget`](Self::forget).
    states: Mutex<HashMap<JobId, JobState>>,
}

impl ProgressPublisher {
    pub fn new(broadcast: Arc<dyn BroadcastStore>, state_ttl: Duration) -> Self {
        Self {
            broadcast,
            state_ttl,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Fold `event` into the cached state, then publish it on the job topic.
    pub async fn publish(&self, event: ProgressEvent) -> Result<(), BroadcastError> {
        let job_id = event.job_id();
        let envelope = EventEnvelope::new(event);

        let known = self.states.lock().unwrap().get(&job_id).cloned();
        let mut state = match known {
            Some(state) => state,
            None => self
                .cached_state(job_id)
                .await?
                .unwrap_or_else(|| JobState::unknown(job_id)),
        };
        state.apply(&envelope);
        self.write_state(&state).await?;

        let payload = serde_json::to_string(&envelope)?;
        self.broadcast.publish(&job_topic(job_id), payload).await?;
        debug!(job_id = %job_id, event = envelope.event().event_type(), "progress event published");
        Ok(())
    }

    /// Replace the cached state outright (job start, cancellation).
    pub async fn set_state(&self, state: JobState) -> Result<(), BroadcastError> {
        self.write_state(&state).await
    }

    pub async fn cached_state(&self, job_id: JobId) -> Result<Option<JobState>, BroadcastError> {
        read_state(&*self.broadcast, job_id).await
    }

    /// Drop the in-process state of a job whose run has ended, however it ended.
    pub fn forget(&self, job_id: JobId) {
        self.states.lock().unwrap().remove(&job_id);
    }

    /// Whether an in-process state is held for `job_id`.
    pub fn is_tracking(&self, job_id: JobId) -> bool {
        self.states.lock().unwrap().contains_key(&job_id)
    }

    async fn write_state(&self, state: &JobState) -> Result<(), BroadcastError> {
        let payload = serde_json::to_string(state)?;
        self.broadcast
            .set_with_ttl(&job_state_key(state.job_id), payload, self.state_ttl)
            .await?;

        let mut states = self.states.lock().unwrap();
        if state.is_terminal() {
            states.remove(&state.job_id);
        } else {
            states.insert(state.job_id, state.clone());
        }
        Ok(())
    }
}

async fn read_state(
    broadcast: &dyn BroadcastStore,
    job_id: JobId,
) -> Result<Option<JobState>, BroadcastError> {
    match broadcast.get(&job_state_key(job_id)).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// One item of a job subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum JobUpdate {
    /// Cached state replayed on connect, or the terminal state found at a liveness tick.
    Snapshot(JobState),
    Event(EventEnvelope),
}

/// Receiving end of a job subscription. Ends after the job reaches a terminal state.
#[derive(Debug)]
pub struct JobUpdates {
    receiver: mpsc::UnboundedReceiver<JobUpdate>,
}

impl JobUpdates {
    pub async fn recv(&mut self) -> Option<JobUpdate> {
        self.receiver.recv().await
    }

    pub fn into_inner(self) -> mpsc::UnboundedReceiver<JobUpdate> {
        self.receiver
    }

    /// Drain the subscription until it ends.
    pub async fn collect(mut self) -> Vec<JobUpdate> {
        let mut out = Vec::new();
        while let Some(update) = self.receiver.recv().await {
            out.push(update);
        }
        out
    }
}

/// Relays a job's broadcast topic to a subscriber, starting with the cached state.
#[derive(Clone)]
pub struct SubscriptionGateway {
    broadcast: Arc<dyn BroadcastStore>,
    poll_interval: Duration,
}

impl SubscriptionGateway {
    pub fn new(broadcast: Arc<dyn BroadcastStore>, poll_interval: Duration) -> Self {
        Self {
            broadcast,
            poll_interval,
        }
    }

    /// Subscribe to `job_id`'s progress.
    ///
    /// `fallback` is replayed when nothing is cached (e.g. the entry expired). The
    /// sequence ends on a terminal event, or at the first liveness tick that finds a
    /// terminal cached state. Dropping the returned [`JobUpdates`] unregisters the
    /// subscription without affecting other subscribers.
    pub async fn subscribe(
        &self,
        job_id: JobId,
        fallback: JobState,
    ) -> Result<JobUpdates, BroadcastError> {
        let mut subscription = self.broadcast.subscribe(&job_topic(job_id)).await?;
        let snapshot = read_state(&*self.broadcast, job_id)
            .await?
            .unwrap_or(fallback);

        let (tx, rx) = mpsc::unbounded_channel();
        let finished = snapshot.is_terminal();
        let _ = tx.send(JobUpdate::Snapshot(snapshot));
        if finished {
            return Ok(JobUpdates { receiver: rx });
        }

        let broadcast = self.broadcast.clone();
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            loop {
                match subscription.recv_timeout(poll_interval).await {
                    Ok(raw) => {
                        let envelope: EventEnvelope = match serde_json::from_str(&raw) {
                            Ok(e) => e,
                            Err(e) => {
                                warn!(job_id = %job_id, error = %e, "skipping malformed progress event");
                                continue;
                            }
                        };
                        let terminal = envelope.event().is_terminal();
                        if tx.send(JobUpdate::Event(envelope)).is_err() || terminal {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if tx.is_closed() {
                            break;
                        }
                        match read_state(&*broadcast, job_id).await {
                            Ok(Some(state)) if state.is_terminal() => {
                                let _ = tx.send(JobUpdate::Snapshot(state));
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(job_id = %job_id, error = %e, "liveness check failed");
                            }
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!(job_id = %job_id, "subscription closed");
        });

        Ok(JobUpdates { receiver: rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loglens_core::{Job, JobStatus};
    use loglens_events::{BatchProgress, InMemoryBroadcastStore, JobCompleted};

    fn setup() -> (Arc<InMemoryBroadcastStore>, ProgressPublisher, SubscriptionGateway) {
        let store = Arc::new(InMemoryBroadcastStore::new());
        let publisher = ProgressPublisher::new(store.clone(), Duration::from_secs(3600));
        let gateway = SubscriptionGateway::new(store.clone(), Duration::from_millis(10));
        (store, publisher, gateway)
    }

    fn completed(job_id: JobId) -> ProgressEvent {
        ProgressEvent::JobCompleted(JobCompleted {
            job_id,
            chunks_processed: 1,
            total_chunks: 1,
            anomalies_found: 0,
        })
    }

    #[tokio::test]
    async fn publish_refreshes_cached_state() {
        let (_, publisher, _) = setup();
        let job_id = JobId::new();
        publisher.publish(completed(job_id)).await.unwrap();

        let state = publisher.cached_state(job_id).await.unwrap().unwrap();
        assert_eq!(state.status, Some(JobStatus::Completed));
        assert_eq!(state.progress, 1.0);
    }

    #[tokio::test]
    async fn live_subscriber_gets_snapshot_then_events_then_ends() {
        let (_, publisher, gateway) = setup();
        let job = Job::new("a.log", 10, 1);
        let mut updates = gateway
            .subscribe(job.id, JobState::from_job(&job, 0))
            .await
            .unwrap();

        publisher.publish(completed(job.id)).await.unwrap();

        let first = updates.recv().await.unwrap();
        assert!(matches!(first, JobUpdate::Snapshot(ref s) if s.status == Some(JobStatus::Pending)));
        let second = updates.recv().await.unwrap();
        assert!(matches!(second, JobUpdate::Event(ref e) if e.event().is_terminal()));
        assert!(updates.recv().await.is_none());
    }

    #[tokio::test]
    async fn terminal_cached_state_ends_stream_without_events() {
        let (_, publisher, gateway) = setup();
        let job_id = JobId::new();
        let mut updates = gateway
            .subscribe(job_id, JobState::unknown(job_id))
            .await
            .unwrap();
        assert!(matches!(updates.recv().await, Some(JobUpdate::Snapshot(_))));

        // State flips to terminal without any event on the topic.
        let mut state = JobState::unknown(job_id);
        state.status = Some(JobStatus::Cancelled);
        publisher.set_state(state).await.unwrap();

        let last = tokio::time::timeout(Duration::from_secs(2), updates.recv())
            .await
            .expect("subscription should end at the next liveness tick");
        assert!(matches!(last, Some(JobUpdate::Snapshot(ref s)) if s.status == Some(JobStatus::Cancelled)));
        assert!(updates.recv().await.is_none());
    }

    #[tokio::test]
    async fn in_flight_state_is_dropped_when_forgotten() {
        let (_, publisher, _) = setup();
        let job_id = JobId::new();
        publisher
            .publish(ProgressEvent::BatchProgress(BatchProgress {
                job_id,
                chunk_id: loglens_core::ChunkId::new(),
                chunk_number: 0,
                progress: 50.0,
                lines_processed: 1,
                total_lines: 2,
                anomalies: Vec::new(),
            }))
            .await
            .unwrap();
        assert!(publisher.is_tracking(job_id));

        publisher.forget(job_id);
        assert!(!publisher.is_tracking(job_id));
        // The shared cache keeps the last state for subscribers.
        assert!(publisher.cached_state(job_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn repeated_streams_of_a_finished_job_release_their_subscriptions() {
        let (store, publisher, gateway) = setup();
        let job_id = JobId::new();
        publisher.publish(completed(job_id)).await.unwrap();

        for _ in 0..1000 {
            let updates = gateway
                .subscribe(job_id, JobState::unknown(job_id))
                .await
                .unwrap()
                .collect()
                .await;
            assert_eq!(updates.len(), 1);
        }
        assert!(store.registered_senders() <= 1);
    }

    #[tokio::test]
    async fn dropping_one_subscriber_does_not_affect_another() {
        let (_, publisher, gateway) = setup();
        let job_id = JobId::new();
        let a = gateway.subscribe(job_id, JobState::unknown(job_id)).await.unwrap();
        let b = gateway.subscribe(job_id, JobState::unknown(job_id)).await.unwrap();
        drop(a);

        // Let the dropped relay notice at its next tick.
        tokio::time::sleep(Duration::from_millis(50)).await;
        publisher.publish(completed(job_id)).await.unwrap();

        let updates = b.collect().await;
        assert_eq!(updates.len(), 2);
        assert!(matches!(updates[1], JobUpdate::Event(_)));
    }
}
