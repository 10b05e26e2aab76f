//! Per-task fan-out for streaming clients.
//!
//! Each client owns a bounded outbound channel; the hub only ever sends
//! non-blockingly. A client whose buffer is full gets evicted on the
//! spot, so one slow consumer can never stall a broadcast for the rest.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Outbound buffer slots per client.
pub const CLIENT_BUFFER: usize = 256;

struct ClientHandle {
    tx: mpsc::Sender<Value>,
    tasks: HashSet<String>,
}

#[derive(Default)]
pub struct Hub {
    clients: RwLock<HashMap<u64, ClientHandle>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client, handing back its id and the receiving end of its
    /// outbound buffer.
    pub async fn register(&self) -> (u64, mpsc::Receiver<Value>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        self.clients.write().await.insert(
            id,
            ClientHandle {
                tx,
                tasks: HashSet::new(),
            },
        );
        info!("client {id} registered");
        (id, rx)
    }

    pub async fn unregister(&self, id: u64) {
        if self.clients.write().await.remove(&id).is_some() {
            info!("client {id} unregistered");
        }
    }

    pub async fn subscribe(&self, id: u64, task_id: &str) {
        if let Some(client) = self.clients.write().await.get_mut(&id) {
            client.tasks.insert(task_id.to_string());
            debug!("client {id} subscribed to task {task_id}");
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Push a frame to one client. Returns false (and evicts) when the
    /// client's buffer is full or gone.
    pub async fn send_to(&self, id: u64, frame: Value) -> bool {
        let full = {
            let clients = self.clients.read().await;
            match clients.get(&id) {
                Some(client) => client.tx.try_send(frame).is_err(),
                None => return false,
            }
        };
        if full {
            warn!("client {id} not keeping up, evicting");
            self.unregister(id).await;
            return false;
        }
        true
    }

    /// Fan a frame out to every subscriber of `task_id`. Slow consumers
    /// are evicted within this one broadcast attempt; everyone else
    /// still receives the frame.
    pub async fn broadcast_to_task(&self, task_id: &str, frame: Value) {
        let mut evict = Vec::new();
        {
            let clients = self.clients.read().await;
            for (id, client) in clients.iter() {
                if !client.tasks.contains(task_id) {
                    continue;
                }
                if client.tx.try_send(frame.clone()).is_err() {
                    evict.push(*id);
                }
            }
        }
        for id in evict {
            warn!("client {id} not keeping up, evicting");
            self.unregister(id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_subscribe_unregister() {
        let hub = Hub::new();
        let (id, _rx) = hub.register().await;
        hub.subscribe(id, "t1").await;
        assert_eq!(hub.client_count().await, 1);
        hub.unregister(id).await;
        assert_eq!(hub.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_subscribers() {
        let hub = Hub::new();
        let (sub, mut sub_rx) = hub.register().await;
        let (other, mut other_rx) = hub.register().await;
        hub.subscribe(sub, "t1").await;
        hub.subscribe(other, "t2").await;

        hub.broadcast_to_task("t1", json!({"n": 1})).await;

        assert_eq!(sub_rx.recv().await.unwrap()["n"], 1);
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_consumer_evicted_others_unaffected() {
        let hub = Hub::new();
        let (slow, _slow_rx) = hub.register().await;
        let (fast, mut fast_rx) = hub.register().await;
        hub.subscribe(slow, "t1").await;
        hub.subscribe(fast, "t1").await;

        // The fast client drains after every broadcast; the slow one
        // never reads and saturates its buffer.
        let total = CLIENT_BUFFER + 1;
        let mut received = 0usize;
        for i in 0..total {
            hub.broadcast_to_task("t1", json!({"seq": i})).await;
            if fast_rx.recv().await.is_some() {
                received += 1;
            }
        }

        // The saturated client was gone within the overflowing attempt;
        // the draining client saw every frame.
        assert_eq!(received, total);
        assert_eq!(hub.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_send_to_unknown_client_is_noop() {
        let hub = Hub::new();
        assert!(!hub.send_to(42, json!({})).await);
    }
}
