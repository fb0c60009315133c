//! Broadcast store abstraction: per-topic pub/sub plus a small expiring key/value cache.
//!
//! Publishing is fire-and-forget. A subscriber only sees messages published after
//! its subscription is established; the cached value is how late subscribers catch up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

use loglens_core::JobId;

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("broadcast backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for BroadcastError {
    fn from(e: serde_json::Error) -> Self {
        BroadcastError::Serialization(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    /// Nothing arrived within the timeout.
    Timeout,
    /// The publisher side is gone; no more messages will arrive.
    Disconnected,
}

/// Raw messages received on one topic, in publish order.
#[derive(Debug)]
pub struct Subscription {
    receiver: UnboundedReceiver<String>,
}

impl Subscription {
    pub fn new(receiver: UnboundedReceiver<String>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. `None` once the topic is closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<String, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Wait for up to `timeout` for the next message.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(RecvTimeoutError::Disconnected),
            Err(_) => Err(RecvTimeoutError::Timeout),
        }
    }
}

/// Pub/sub topics plus an expiring key/value store, shared by the publisher and subscribers.
#[async_trait]
pub trait BroadcastStore: Send + Sync {
    async fn publish(&self, topic: &str, message: String) -> Result<(), BroadcastError>;

    /// Returns once the subscription is live; messages published afterwards are delivered.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BroadcastError>;

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), BroadcastError>;

    /// `None` when the key was never set or has expired.
    async fn get(&self, key: &str) -> Result<Option<String>, BroadcastError>;
}

#[async_trait]
impl<B> BroadcastStore for Arc<B>
where
    B: BroadcastStore + ?Sized,
{
    async fn publish(&self, topic: &str, message: String) -> Result<(), BroadcastError> {
        (**self).publish(topic, message).await
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BroadcastError> {
        (**self).subscribe(topic).await
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), BroadcastError> {
        (**self).set_with_ttl(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BroadcastError> {
        (**self).get(key).await
    }
}

/// Topic carrying a job's progress events.
pub fn job_topic(job_id: JobId) -> String {
    format!("stream:job:{job_id}")
}

/// Key holding a job's cached [`JobState`](crate::JobState).
pub fn job_state_key(job_id: JobId) -> String {
    format!("state:job:{job_id}")
}
