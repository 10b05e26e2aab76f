//! ARP sweep worker: consumes `arp_service`, resolves every address in
//! the requested range over the configured interface and replies with
//! the partitioned device list.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use scanhive::config::{SweepConfig, WorkerConfig};
use scanhive::models::{ArpReply, ArpRequest};
use scanhive::queue::worker::{self, ScanHandler};
use scanhive::queue::ARP_QUEUE;
use scanhive::scan::arp::{partition_devices, ArpSweep};

struct ArpHandler {
    sweep: SweepConfig,
}

#[async_trait]
impl ScanHandler for ArpHandler {
    async fn handle(&self, body: &[u8]) -> Result<Vec<u8>> {
        let req: ArpRequest =
            serde_json::from_slice(body).context("unmarshal ARP scan request")?;
        info!(
            "ARP scan of {} on interface {} (task {})",
            req.ip_range, req.interface_name, req.task_id
        );

        let scanner = ArpSweep::new(&req.interface_name, &self.sweep);
        let reply = match scanner.scan(&req.ip_range).await {
            Ok(devices) => {
                let (online_devices, offline_devices) = partition_devices(&devices);
                info!(
                    "ARP scan completed: {} devices, {} online (task {})",
                    devices.len(),
                    online_devices.len(),
                    req.task_id
                );
                ArpReply {
                    task_id: req.task_id,
                    status: "completed".into(),
                    total_count: devices.len(),
                    online_count: online_devices.len(),
                    offline_count: offline_devices.len(),
                    devices,
                    online_devices,
                    offline_devices,
                    error: String::new(),
                }
            }
            Err(e) => ArpReply {
                task_id: req.task_id,
                status: "failed".into(),
                devices: Vec::new(),
                online_devices: Vec::new(),
                offline_devices: Vec::new(),
                total_count: 0,
                online_count: 0,
                offline_count: 0,
                error: e.to_string(),
            },
        };

        Ok(serde_json::to_vec(&reply)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    scanhive::init_tracing();
    let cfg = WorkerConfig::from_env(ARP_QUEUE);
    let handler = Arc::new(ArpHandler {
        sweep: SweepConfig::arp_from_env(),
    });
    worker::run(&cfg, handler).await
}
