//! ICMP echo probing.
//!
//! Targets are resolved (first record wins) and pinged sequentially;
//! a DNS failure becomes a per-target error entry and the scan moves on.
//! Requires a privileged (raw-socket) deployment.

use std::net::IpAddr;
use std::time::Duration;

use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};
use tracing::debug;

use crate::models::IcmpResult;

pub struct Pinger {
    count: i32,
    timeout: Duration,
}

impl Pinger {
    pub fn new(count: i32, timeout: Duration) -> Self {
        Self {
            count: count.max(1),
            timeout,
        }
    }

    /// Ping one target, reporting sent/received/loss. Errors are carried
    /// inside the result so one bad target never aborts the batch.
    pub async fn ping(&self, target: &str) -> IcmpResult {
        let mut res = IcmpResult {
            target: target.to_string(),
            address: String::new(),
            packets_sent: 0,
            packets_received: 0,
            packet_loss_percent: 0.0,
            error: String::new(),
        };

        let addr = match resolve(target).await {
            Ok(addr) => addr,
            Err(e) => {
                res.error = format!("DNS lookup error: {e}");
                return res;
            }
        };
        res.address = addr.to_string();

        let config = match addr {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = match Client::new(&config) {
            Ok(c) => c,
            Err(e) => {
                res.error = format!("ping init error: {e}");
                return res;
            }
        };

        let mut pinger = client.pinger(addr, PingIdentifier(rand::random())).await;
        pinger.timeout(self.timeout);

        let payload = [0u8; 56];
        for seq in 0..self.count {
            res.packets_sent += 1;
            match pinger.ping(PingSequence(seq as u16), &payload).await {
                Ok((_packet, rtt)) => {
                    debug!("echo reply from {} seq={} rtt={:?}", addr, seq, rtt);
                    res.packets_received += 1;
                }
                Err(_) => {}
            }
        }

        if res.packets_sent > 0 {
            let lost = res.packets_sent - res.packets_received;
            res.packet_loss_percent = lost as f64 / res.packets_sent as f64 * 100.0;
        }
        res
    }
}

async fn resolve(target: &str) -> anyhow::Result<IpAddr> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((target, 0)).await?;
    addrs
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| anyhow::anyhow!("no addresses for {target}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_passes_literal_ips_through() {
        assert_eq!(
            resolve("127.0.0.1").await.unwrap(),
            "127.0.0.1".parse::<IpAddr>().unwrap()
        );
        assert_eq!(resolve("::1").await.unwrap(), "::1".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_unresolvable_target_becomes_result_error() {
        let pinger = Pinger::new(1, Duration::from_millis(100));
        let res = pinger.ping("definitely-not-a-host.invalid").await;
        assert_eq!(res.target, "definitely-not-a-host.invalid");
        assert!(res.error.contains("DNS lookup error"));
        assert_eq!(res.packets_sent, 0);
    }

    #[test]
    fn test_count_floor() {
        let pinger = Pinger::new(0, Duration::from_secs(1));
        assert_eq!(pinger.count, 1);
    }
}
