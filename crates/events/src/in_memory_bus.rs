//! In-memory broadcast store for tests/dev.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::Instant;

use crate::bus::{BroadcastError, BroadcastStore, Subscription};

/// In-process pub/sub with expiring values.
///
/// - Best-effort fan-out; dropped subscriptions are pruned on the next publish or subscribe
/// - Expired values are evicted on read and swept on every write
#[derive(Debug, Default)]
pub struct InMemoryBroadcastStore {
    topics: Mutex<HashMap<String, Vec<UnboundedSender<String>>>>,
    values: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryBroadcastStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .map(|t| t.get(topic).map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count()))
            .unwrap_or(0)
    }

    /// Senders held across all topics, closed ones included.
    pub fn registered_senders(&self) -> usize {
        self.topics
            .lock()
            .map(|t| t.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Values held, expired ones included until the next sweep.
    pub fn stored_values(&self) -> usize {
        self.values.lock().map(|v| v.len()).unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> BroadcastError {
    BroadcastError::Backend("in-memory broadcast lock poisoned".to_string())
}

#[async_trait]
impl BroadcastStore for InMemoryBroadcastStore {
    async fn publish(&self, topic: &str, message: String) -> Result<(), BroadcastError> {
        let mut topics = self.topics.lock().map_err(poisoned)?;
        if let Some(subs) = topics.get_mut(topic) {
            // Drop any dead subscribers while publishing.
            subs.retain(|tx| tx.send(message.clone()).is_ok());
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BroadcastError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = self.topics.lock().map_err(poisoned)?;
        // Quiet topics see no publish, so closed senders are reclaimed here too.
        topics.retain(|_, subs| {
            subs.retain(|tx| !tx.is_closed());
            !subs.is_empty()
        });
        topics.entry(topic.to_string()).or_default().push(tx);
        Ok(Subscription::new(rx))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), BroadcastError> {
        let now = Instant::now();
        let mut values = self.values.lock().map_err(poisoned)?;
        values.retain(|_, (_, expires_at)| *expires_at > now);
        values.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BroadcastError> {
        let mut values = self.values.lock().map_err(poisoned)?;
        match values.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                values.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RecvTimeoutError;

    #[tokio::test]
    async fn fans_out_per_topic() {
        let store = InMemoryBroadcastStore::new();
        let mut a = store.subscribe("stream:job:a").await.unwrap();
        let mut b = store.subscribe("stream:job:a").await.unwrap();
        let mut other = store.subscribe("stream:job:b").await.unwrap();

        store.publish("stream:job:a", "one".into()).await.unwrap();
        store.publish("stream:job:a", "two".into()).await.unwrap();

        assert_eq!(a.recv().await.as_deref(), Some("one"));
        assert_eq!(a.recv().await.as_deref(), Some("two"));
        assert_eq!(b.recv().await.as_deref(), Some("one"));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_messages() {
        let store = InMemoryBroadcastStore::new();
        store.publish("t", "early".into()).await.unwrap();

        let mut sub = store.subscribe("t").await.unwrap();
        assert_eq!(
            sub.recv_timeout(Duration::from_millis(20)).await,
            Err(RecvTimeoutError::Timeout)
        );
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let store = InMemoryBroadcastStore::new();
        let sub = store.subscribe("t").await.unwrap();
        assert_eq!(store.subscriber_count("t"), 1);

        drop(sub);
        store.publish("t", "x".into()).await.unwrap();
        assert_eq!(store.subscriber_count("t"), 0);
    }

    #[tokio::test]
    async fn finished_subscriptions_do_not_accumulate() {
        let store = InMemoryBroadcastStore::new();
        for _ in 0..1000 {
            let sub = store.subscribe("stream:job:done").await.unwrap();
            drop(sub);
        }
        assert!(store.registered_senders() <= 1);
        assert_eq!(store.subscriber_count("stream:job:done"), 0);

        let _live = store.subscribe("stream:job:other").await.unwrap();
        assert_eq!(store.registered_senders(), 1);
        assert_eq!(store.subscriber_count("stream:job:other"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_values_are_swept_on_write() {
        let store = InMemoryBroadcastStore::new();
        for i in 0..10 {
            store
                .set_with_ttl(&format!("state:job:{i}"), "{}".into(), Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(store.stored_values(), 10);

        tokio::time::advance(Duration::from_secs(61)).await;
        store
            .set_with_ttl("state:job:fresh", "{}".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.stored_values(), 1);
        assert_eq!(store.get("state:job:fresh").await.unwrap().as_deref(), Some("{}"));
    }

    #[tokio::test(start_paused = true)]
    async fn values_expire() {
        let store = InMemoryBroadcastStore::new();
        store
            .set_with_ttl("state:job:a", "{}".into(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(store.get("state:job:a").await.unwrap().as_deref(), Some("{}"));

        tokio::time::advance(Duration::from_secs(3601)).await;
        assert_eq!(store.get("state:job:a").await.unwrap(), None);
        assert_eq!(store.get("missing").await.unwrap(), None);
    }
}
