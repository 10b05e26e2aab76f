//! ICMP echo worker: consumes `icmp_service` and pings each target in
//! turn. Needs a privileged deployment for the raw socket.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use scanhive::config::{PingConfig, WorkerConfig};
use scanhive::models::{IcmpReply, IcmpRequest};
use scanhive::queue::worker::{self, ScanHandler};
use scanhive::queue::ICMP_QUEUE;
use scanhive::scan::icmp::Pinger;

struct IcmpHandler {
    ping: PingConfig,
}

#[async_trait]
impl ScanHandler for IcmpHandler {
    async fn handle(&self, body: &[u8]) -> Result<Vec<u8>> {
        let req: IcmpRequest =
            serde_json::from_slice(body).context("unmarshal ICMP scan request")?;
        info!(
            "ICMP scan of {} targets, {} echoes each (task {})",
            req.targets.len(),
            req.ping_count,
            req.task_id
        );

        let pinger = Pinger::new(req.ping_count, self.ping.timeout);
        let mut results = Vec::with_capacity(req.targets.len());
        for target in &req.targets {
            results.push(pinger.ping(target).await);
        }

        let reply = IcmpReply {
            task_id: req.task_id,
            status: "completed".into(),
            results,
            error: String::new(),
        };
        Ok(serde_json::to_vec(&reply)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    scanhive::init_tracing();
    let cfg = WorkerConfig::from_env(ICMP_QUEUE);
    let handler = Arc::new(IcmpHandler {
        ping: PingConfig::from_env(),
    });
    worker::run(&cfg, handler).await
}
