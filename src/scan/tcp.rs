//! TCP connect sweep.
//!
//! Probes every parsed port concurrently; each port gets up to
//! `max_retries` connect attempts bounded by `timeout`, with a fixed
//! delay between attempts. Cancellation drops the in-flight connects.

use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::config::SweepConfig;
use crate::error::ScanError;
use crate::scan::ports::parse_ports;

pub struct TcpSweep {
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl TcpSweep {
    pub fn new(cfg: &SweepConfig) -> Self {
        Self {
            timeout: cfg.timeout,
            max_retries: cfg.max_retries.max(1),
            retry_delay: cfg.retry_delay,
        }
    }

    /// Sweep `spec` against `host`, returning the sorted, deduplicated
    /// list of open ports.
    pub async fn scan(&self, host: &str, spec: &str) -> Result<Vec<u16>, ScanError> {
        let ports = parse_ports(spec)?;
        debug!("sweeping {} ports on {}", ports.len(), host);

        let fan_out = ports.len().max(1);
        let mut open: Vec<u16> = stream::iter(ports)
            .map(|port| async move {
                if self.is_open(host, port).await {
                    Some(port)
                } else {
                    None
                }
            })
            .buffer_unordered(fan_out)
            .filter_map(|r| async move { r })
            .collect()
            .await;

        open.sort_unstable();
        open.dedup();
        Ok(open)
    }

    async fn is_open(&self, host: &str, port: u16) -> bool {
        for attempt in 1..=self.max_retries {
            match timeout(self.timeout, TcpStream::connect((host, port))).await {
                Ok(Ok(_stream)) => return true,
                Ok(Err(_)) | Err(_) => {}
            }
            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        false
    }
}
