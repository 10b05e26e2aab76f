//! Nmap worker: consumes `nmap_service` and demuxes each body on
//! `scan_method` / `scanner_type` into one of the three probe modes.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use scanhive::config::WorkerConfig;
use scanhive::models::{
    NmapHostReply, NmapHostRequest, NmapOsReply, NmapOsRequest, NmapPortReply, NmapPortRequest,
};
use scanhive::queue::worker::{self, ScanHandler};
use scanhive::queue::NMAP_QUEUE;
use scanhive::scan::nmap::NmapScanner;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ScanMethodProbe {
    scan_method: String,
    scanner_type: String,
}

struct NmapHandler {
    scanner: NmapScanner,
}

impl NmapHandler {
    async fn port_scan(&self, body: &[u8]) -> Result<Vec<u8>> {
        let req: NmapPortRequest =
            serde_json::from_slice(body).context("unmarshal TCP/UDP scan request")?;
        info!(
            "nmap {} scan of {} ports {} (task {})",
            req.scanner_type, req.ip, req.ports, req.task_id
        );

        let reply = match self
            .scanner
            .port_scan(&req.ip, &req.ports, &req.scanner_type)
            .await
        {
            Ok(outcome) => NmapPortReply {
                task_id: req.task_id,
                host: outcome.host,
                port_info: vec![outcome.port_info],
                status: "completed".into(),
                error: String::new(),
            },
            Err(e) => {
                warn!("TCP/UDP scan failed: {e}");
                NmapPortReply {
                    task_id: req.task_id,
                    host: String::new(),
                    port_info: Vec::new(),
                    status: "failed".into(),
                    error: e.to_string(),
                }
            }
        };
        Ok(serde_json::to_vec(&reply)?)
    }

    async fn os_detection(&self, body: &[u8]) -> Result<Vec<u8>> {
        let req: NmapOsRequest =
            serde_json::from_slice(body).context("unmarshal OS detection request")?;
        info!("nmap OS detection of {} (task {})", req.ip, req.task_id);

        let reply = match self.scanner.os_detection(&req.ip).await {
            Ok(outcome) => NmapOsReply {
                task_id: req.task_id,
                host: outcome.host,
                name: outcome.name,
                accuracy: outcome.accuracy,
                vendor: outcome.vendor,
                family: outcome.family,
                os_type: outcome.os_type,
                status: "completed".into(),
                error: String::new(),
            },
            Err(e) => {
                warn!("OS detection failed: {e}");
                NmapOsReply {
                    task_id: req.task_id,
                    host: String::new(),
                    name: "unknown".into(),
                    accuracy: 0,
                    vendor: "unknown".into(),
                    family: "unknown".into(),
                    os_type: "unknown".into(),
                    status: "failed".into(),
                    error: e.to_string(),
                }
            }
        };
        Ok(serde_json::to_vec(&reply)?)
    }

    async fn host_discovery(&self, body: &[u8]) -> Result<Vec<u8>> {
        let req: NmapHostRequest =
            serde_json::from_slice(body).context("unmarshal host discovery request")?;
        info!("nmap host discovery of {} (task {})", req.ip, req.task_id);

        let reply = match self.scanner.host_discovery(&req.ip).await {
            Ok(outcome) => NmapHostReply {
                task_id: req.task_id,
                host: outcome.host,
                host_up: outcome.host_up,
                host_total: outcome.host_total,
                status: outcome.status,
                dns: outcome.dns,
                reason: outcome.reason,
                error: String::new(),
            },
            Err(e) => {
                warn!("host discovery failed: {e}");
                NmapHostReply {
                    task_id: req.task_id,
                    host: String::new(),
                    host_up: 0,
                    host_total: 0,
                    status: "failed".into(),
                    dns: "unknown".into(),
                    reason: "unknown".into(),
                    error: e.to_string(),
                }
            }
        };
        Ok(serde_json::to_vec(&reply)?)
    }
}

#[async_trait]
impl ScanHandler for NmapHandler {
    async fn handle(&self, body: &[u8]) -> Result<Vec<u8>> {
        let probe: ScanMethodProbe =
            serde_json::from_slice(body).context("unmarshal scan method")?;

        if probe.scan_method == "tcp_udp_scan"
            || probe.scanner_type == "tcp_scan"
            || probe.scanner_type == "udp_scan"
        {
            return self.port_scan(body).await;
        }
        match probe.scan_method.as_str() {
            "os_detection" => self.os_detection(body).await,
            "host_discovery" => self.host_discovery(body).await,
            other => bail!("invalid scan method: {other:?}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    scanhive::init_tracing();
    let cfg = WorkerConfig::from_env(NMAP_QUEUE);
    let handler = Arc::new(NmapHandler {
        scanner: NmapScanner::default(),
    });
    worker::run(&cfg, handler).await
}
