//! Redis-backed broadcast store: `PUBLISH`/`SUBSCRIBE` topics and `SETEX` values.
//!
//! Redis pub/sub is not durable; a subscriber only sees messages published while
//! it is connected. The cached state key covers late subscribers.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use redis::Commands;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

use loglens_events::{BroadcastError, BroadcastStore, Subscription};

/// How often a subscriber thread wakes up to check whether its receiver is gone.
const SUBSCRIBER_READ_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct RedisBroadcastStore {
    client: Arc<redis::Client>,
}

impl RedisBroadcastStore {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, BroadcastError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(backend)?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, BroadcastError>
    where
        T: Send + 'static,
        F: FnOnce(&mut redis::Connection) -> redis::RedisResult<T> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = client.get_connection()?;
            op(&mut conn)
        })
        .await
        .map_err(|e| BroadcastError::Backend(format!("redis task failed: {e}")))?
        .map_err(backend)
    }
}

fn backend(e: redis::RedisError) -> BroadcastError {
    BroadcastError::Backend(e.to_string())
}

#[async_trait]
impl BroadcastStore for RedisBroadcastStore {
    #[instrument(skip(self, message), err)]
    async fn publish(&self, topic: &str, message: String) -> Result<(), BroadcastError> {
        let topic = topic.to_string();
        self.blocking(move |conn| conn.publish::<_, _, i64>(topic, message))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BroadcastError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), BroadcastError>>();

        let client = self.client.clone();
        let topic = topic.to_string();

        // Background thread that receives pub/sub messages and forwards them.
        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    let _ = ready_tx.send(Err(backend(e)));
                    return;
                }
            };
            if let Err(e) = conn.set_read_timeout(Some(SUBSCRIBER_READ_TIMEOUT)) {
                let _ = ready_tx.send(Err(backend(e)));
                return;
            }

            let mut pubsub = conn.as_pubsub();
            if let Err(e) = pubsub.subscribe(&topic) {
                let _ = ready_tx.send(Err(backend(e)));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(e) if e.is_timeout() => {
                        if tx.is_closed() {
                            break;
                        }
                        continue;
                    }
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "redis subscription dropped");
                        break;
                    }
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                if tx.send(payload).is_err() {
                    break;
                }
            }
            debug!(topic = %topic, "redis subscriber exiting");
        });

        ready_rx
            .await
            .map_err(|_| BroadcastError::Backend("redis subscriber thread exited".to_string()))??;
        Ok(Subscription::new(rx))
    }

    #[instrument(skip(self, value), err)]
    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), BroadcastError> {
        let key = key.to_string();
        let seconds = ttl.as_secs().max(1);
        self.blocking(move |conn| {
            redis::cmd("SETEX")
                .arg(key)
                .arg(seconds)
                .arg(value)
                .query::<()>(conn)
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn get(&self, key: &str) -> Result<Option<String>, BroadcastError> {
        let key = key.to_string();
        self.blocking(move |conn| redis::cmd("GET").arg(key).query::<Option<String>>(conn))
            .await
    }
}
