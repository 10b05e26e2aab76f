//! RPC over the broker: publish with a fresh correlation id, wait on a
//! one-shot sink for the reply routed back through the direct reply
//! pseudo-queue.
//!
//! The pending-call registry is single-use per id: a call consumes its
//! sink on reply or removes it on timeout, so no call ever observes two
//! results. Late replies with no registered waiter are dropped silently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicPublishOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use super::{connect, declare_queue, DIRECT_REPLY_QUEUE};
use crate::error::ScanError;
use crate::models::ScanReply;

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Callback invoked for every demultiplexed reply, independently of the
/// waiter that is (or is not) still around to receive it.
pub type ReplyCallback = Arc<dyn Fn(ScanReply) + Send + Sync>;

/// Outstanding calls keyed by correlation id. Sinks are one-shot; the
/// reply consumer never blocks on a dead waiter.
#[derive(Default)]
pub struct PendingCalls {
    inner: Mutex<HashMap<String, oneshot::Sender<ScanReply>>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter, returning the receiving end. Registering an id
    /// twice replaces the older sink, which then times out on its own.
    pub fn register(&self, correlation_id: &str) -> oneshot::Receiver<ScanReply> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(correlation_id.to_string(), tx);
        rx
    }

    /// Deliver a reply to its waiter. Returns false when no waiter was
    /// registered (late reply after timeout).
    pub fn complete(&self, correlation_id: &str, reply: ScanReply) -> bool {
        match self.inner.lock().remove(correlation_id) {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    pub fn remove(&self, correlation_id: &str) {
        self.inner.lock().remove(correlation_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

pub struct RpcClient {
    channel: Channel,
    pending: Arc<PendingCalls>,
    timeout: Duration,
    on_reply: Arc<Mutex<Option<ReplyCallback>>>,
}

impl RpcClient {
    /// Connect, declare the service queues and start the single
    /// long-running consumer on the direct reply pseudo-queue.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Arc<Self>> {
        let conn = connect(url).await?;
        let channel = conn
            .create_channel()
            .await
            .context("failed to open RPC channel")?;

        for queue in [
            super::ARP_QUEUE,
            super::ICMP_QUEUE,
            super::NMAP_QUEUE,
            super::TCP_QUEUE,
        ] {
            declare_queue(&channel, queue).await?;
        }

        let client = Arc::new(Self {
            channel: channel.clone(),
            pending: Arc::new(PendingCalls::new()),
            timeout,
            on_reply: Arc::new(Mutex::new(None)),
        });

        client.start_reply_consumer(channel).await?;
        Ok(client)
    }

    /// Register the fan-out callback (result pipeline + streaming hub).
    pub fn set_reply_callback(&self, callback: ReplyCallback) {
        *self.on_reply.lock() = Some(callback);
    }

    /// Publish `request` to `queue` and wait for the correlated reply.
    pub async fn call<T: Serialize>(
        &self,
        queue: &str,
        request: &T,
    ) -> Result<ScanReply, ScanError> {
        let correlation_id = generate_correlation_id();
        let rx = self.pending.register(&correlation_id);

        let body = serde_json::to_vec(request)
            .map_err(|e| ScanError::Transport(format!("marshal request: {e}")))?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_correlation_id(correlation_id.as_str().into())
            .with_reply_to(DIRECT_REPLY_QUEUE.into());

        debug!("publishing to {queue} (correlation {correlation_id})");
        let published = self
            .channel
            .basic_publish("", queue, BasicPublishOptions::default(), &body, properties)
            .await;
        match published {
            Ok(confirm) => {
                if let Err(e) = confirm.await {
                    self.pending.remove(&correlation_id);
                    return Err(ScanError::Transport(format!("publish to {queue}: {e}")));
                }
            }
            Err(e) => {
                self.pending.remove(&correlation_id);
                return Err(ScanError::Transport(format!("publish to {queue}: {e}")));
            }
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.remove(&correlation_id);
                Err(ScanError::Transport("reply channel closed".into()))
            }
            Err(_) => {
                self.pending.remove(&correlation_id);
                Err(ScanError::Timeout(queue.to_string()))
            }
        }
    }

    async fn start_reply_consumer(&self, channel: Channel) -> Result<()> {
        let mut consumer = channel
            .basic_consume(
                DIRECT_REPLY_QUEUE,
                "gateway-replies",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("failed to consume the direct reply queue")?;

        let pending = self.pending.clone();
        let callbacks = self.on_reply.clone();
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(d) => d,
                    Err(e) => {
                        error!("reply consumer error: {e}");
                        break;
                    }
                };

                let Some(reply) = ScanReply::demux(&delivery.data) else {
                    warn!(
                        "dropping reply matching no known variant ({} bytes)",
                        delivery.data.len()
                    );
                    continue;
                };

                // Fan out to the pipeline before the waiter; ordering
                // between the two deliveries is unspecified.
                if let Some(callback) = callbacks.lock().clone() {
                    callback(reply.clone());
                }

                let correlation_id = delivery
                    .properties
                    .correlation_id()
                    .as_ref()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default();
                if !pending.complete(&correlation_id, reply) {
                    debug!("no waiter for correlation {correlation_id}, dropped");
                }
            }
            warn!("direct reply consumer stopped");
        });
        Ok(())
    }
}

/// 16 random bytes, hex-encoded. Collisions are treated as impossible.
pub fn generate_correlation_id() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().fold(String::with_capacity(32), |mut s, b| {
        s.push_str(&format!("{b:02x}"));
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenericReply, ScanReply};
    use std::collections::HashSet;

    fn reply(task_id: &str) -> ScanReply {
        ScanReply::Generic(GenericReply {
            task_id: task_id.into(),
            result: serde_json::json!({}),
        })
    }

    #[test]
    fn test_correlation_ids_are_32_hex_chars_and_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = generate_correlation_id();
            assert_eq!(id.len(), 32);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
            assert!(seen.insert(id), "correlation id repeated");
        }
    }

    #[tokio::test]
    async fn test_pending_round_trip_consumes_exactly_once() {
        let pending = PendingCalls::new();
        let rx = pending.register("c1");
        assert_eq!(pending.len(), 1);

        assert!(pending.complete("c1", reply("t1")));
        assert!(pending.is_empty());
        assert_eq!(rx.await.unwrap().task_id(), "t1");

        // A second delivery for the same id finds no sink.
        assert!(!pending.complete("c1", reply("t1")));
    }

    #[tokio::test]
    async fn test_unknown_correlation_is_dropped() {
        let pending = PendingCalls::new();
        assert!(!pending.complete("never-registered", reply("t1")));
    }

    #[tokio::test]
    async fn test_timeout_removes_entry() {
        let pending = PendingCalls::new();
        let rx = pending.register("c2");

        let waited =
            tokio::time::timeout(Duration::from_millis(20), rx).await;
        assert!(waited.is_err());
        // The caller removes the entry on timeout, as RpcClient::call does.
        pending.remove("c2");
        assert!(pending.is_empty());

        // A reply arriving after removal is silently dropped.
        assert!(!pending.complete("c2", reply("t2")));
    }

    #[tokio::test]
    async fn test_reregistration_replaces_older_sink() {
        let pending = PendingCalls::new();
        let old_rx = pending.register("c3");
        let new_rx = pending.register("c3");
        assert_eq!(pending.len(), 1);

        assert!(pending.complete("c3", reply("fresh")));
        assert_eq!(new_rx.await.unwrap().task_id(), "fresh");
        assert!(old_rx.await.is_err());
    }
}
