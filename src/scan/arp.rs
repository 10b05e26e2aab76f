//! ARP sweeping over a named interface.
//!
//! The range parser accepts CIDR, dashed ranges and single addresses.
//! Every target is resolved in its own task with a bounded retry loop.
//! Gateways that proxy-answer ARP for absent hosts would otherwise make
//! the whole subnet look online, so a resolution that returns the
//! gateway's MAC for a different address is discarded.

use std::net::Ipv4Addr;
use std::time::Duration;

use ipnet::Ipv4Net;
use libarp::client::ArpClient;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::SweepConfig;
use crate::error::ScanError;
use crate::models::ArpDevice;

pub struct ArpSweep {
    iface: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl ArpSweep {
    pub fn new(iface: &str, cfg: &SweepConfig) -> Self {
        Self {
            iface: iface.to_string(),
            timeout: cfg.timeout,
            max_retries: cfg.max_retries.max(1),
            retry_delay: cfg.retry_delay,
        }
    }

    /// Resolve every address in `ip_range`, one task per target.
    pub async fn scan(&self, ip_range: &str) -> Result<Vec<ArpDevice>, ScanError> {
        let ips = parse_ip_range(ip_range)?;
        debug!("arp sweep of {} addresses on {}", ips.len(), self.iface);

        // For CIDR ranges the first generated host is the conventional
        // gateway; its MAC anchors the proxy-reply suppression below.
        let gateway = ip_range.contains('/').then(|| ips.first().copied()).flatten();

        let mut set = JoinSet::new();
        for ip in ips {
            let iface = self.iface.clone();
            let timeout = self.timeout;
            let max_retries = self.max_retries;
            let retry_delay = self.retry_delay;
            set.spawn(async move {
                resolve_one(&iface, ip, timeout, max_retries, retry_delay).await
            });
        }

        let mut devices = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(device) => devices.push(device),
                Err(e) => warn!("arp resolver task failed: {e}"),
            }
        }

        let gateway_mac = gateway.and_then(|gw| {
            devices
                .iter()
                .find(|d| d.ip == gw.to_string() && !d.mac.is_empty())
                .map(|d| d.mac.clone())
        });
        if let Some(mac) = gateway_mac {
            let gw = gateway.map(|g| g.to_string()).unwrap_or_default();
            suppress_proxy_replies(&mut devices, &gw, &mac);
        }

        Ok(devices)
    }
}

async fn resolve_one(
    iface: &str,
    ip: Ipv4Addr,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
) -> ArpDevice {
    let mut mac = String::new();
    for attempt in 1..=max_retries {
        let mut client = match ArpClient::new_with_iface_name(iface) {
            Ok(c) => c,
            Err(e) => {
                warn!("arp client on {iface} failed: {e}");
                break;
            }
        };
        if let Ok(found) = client.ip_to_mac(ip, Some(timeout)).await {
            mac = found.to_string();
            break;
        }
        if attempt < max_retries {
            tokio::time::sleep(retry_delay).await;
        }
    }

    let status = if mac.is_empty() { "offline" } else { "online" };
    ArpDevice {
        ip: ip.to_string(),
        mac,
        vendor: None,
        status: status.to_string(),
    }
}

/// A non-gateway target reporting the gateway's own MAC was only resolved
/// through the gateway's proxy reply; record it offline with no MAC.
fn suppress_proxy_replies(devices: &mut [ArpDevice], gateway_ip: &str, gateway_mac: &str) {
    for device in devices.iter_mut() {
        if device.ip != gateway_ip && device.mac.eq_ignore_ascii_case(gateway_mac) {
            device.mac = String::new();
            device.status = "offline".to_string();
        }
    }
}

/// Split a device list on `status == "online"`.
pub fn partition_devices(devices: &[ArpDevice]) -> (Vec<ArpDevice>, Vec<ArpDevice>) {
    devices.iter().cloned().partition(|d| d.is_online())
}

/// Expand an IP range expression into concrete IPv4 addresses.
///
/// CIDR drops the network and broadcast addresses whenever the raw set
/// has at least three entries; /31 and /32 keep both endpoints. Dashed
/// ranges are inclusive. ARP is a link-layer IPv4 affair, so IPv6 input
/// is rejected outright.
pub fn parse_ip_range(ip_range: &str) -> Result<Vec<Ipv4Addr>, ScanError> {
    let spec = ip_range.trim();
    if spec.is_empty() {
        return Err(ScanError::Validation("ip_range is empty".into()));
    }

    if spec.contains('/') {
        let net: Ipv4Net = spec
            .parse()
            .map_err(|e| ScanError::Validation(format!("invalid CIDR {spec:?}: {e}")))?;
        return Ok(net.hosts().collect());
    }

    if spec.contains('-') {
        let parts: Vec<&str> = spec.split('-').collect();
        if parts.len() != 2 {
            return Err(ScanError::Validation("invalid IP range format".into()));
        }
        let start: Ipv4Addr = parts[0]
            .trim()
            .parse()
            .map_err(|_| ScanError::Validation(format!("invalid start IP {:?}", parts[0])))?;
        let end: Ipv4Addr = parts[1]
            .trim()
            .parse()
            .map_err(|_| ScanError::Validation(format!("invalid end IP {:?}", parts[1])))?;
        if u32::from(start) > u32::from(end) {
            return Err(ScanError::Validation("start IP is after end IP".into()));
        }
        return Ok((u32::from(start)..=u32::from(end)).map(Ipv4Addr::from).collect());
    }

    let ip: Ipv4Addr = spec
        .parse()
        .map_err(|_| ScanError::Validation(format!("invalid IP address {spec:?}")))?;
    Ok(vec![ip])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ips(range: &str) -> Vec<String> {
        parse_ip_range(range)
            .unwrap()
            .into_iter()
            .map(|ip| ip.to_string())
            .collect()
    }

    #[test]
    fn test_cidr_drops_network_and_broadcast() {
        assert_eq!(ips("10.0.0.0/30"), vec!["10.0.0.1", "10.0.0.2"]);
        let all = ips("192.168.1.0/24");
        assert_eq!(all.len(), 254);
        assert_eq!(all.first().unwrap(), "192.168.1.1");
        assert_eq!(all.last().unwrap(), "192.168.1.254");
    }

    #[test]
    fn test_slash_31_and_32_keep_endpoints() {
        assert_eq!(ips("10.0.0.0/31"), vec!["10.0.0.0", "10.0.0.1"]);
        assert_eq!(ips("10.0.0.7/32"), vec!["10.0.0.7"]);
    }

    #[test]
    fn test_dashed_range_inclusive() {
        assert_eq!(
            ips("10.0.0.1-10.0.0.3"),
            vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]
        );
        assert_eq!(ips("10.0.0.5 - 10.0.0.5"), vec!["10.0.0.5"]);
    }

    #[test]
    fn test_single_address() {
        assert_eq!(ips("172.16.0.9"), vec!["172.16.0.9"]);
    }

    #[test]
    fn test_rejects_malformed_ranges() {
        assert!(parse_ip_range("").is_err());
        assert!(parse_ip_range("10.0.0.9-10.0.0.1").is_err());
        assert!(parse_ip_range("10.0.0.1-10.0.0.2-10.0.0.3").is_err());
        assert!(parse_ip_range("300.0.0.1").is_err());
        assert!(parse_ip_range("10.0.0.0/33").is_err());
        assert!(parse_ip_range("fe80::/64").is_err());
    }

    #[test]
    fn test_partition_counts_add_up() {
        let devices = vec![
            ArpDevice {
                ip: "10.0.0.1".into(),
                mac: "aa:aa:aa:aa:aa:01".into(),
                vendor: None,
                status: "online".into(),
            },
            ArpDevice {
                ip: "10.0.0.2".into(),
                mac: String::new(),
                vendor: None,
                status: "offline".into(),
            },
            ArpDevice {
                ip: "10.0.0.3".into(),
                mac: "aa:aa:aa:aa:aa:03".into(),
                vendor: None,
                status: "online".into(),
            },
        ];
        let (online, offline) = partition_devices(&devices);
        assert_eq!(online.len() + offline.len(), devices.len());
        assert_eq!(online.len(), 2);
        assert_eq!(offline.len(), 1);
    }

    #[test]
    fn test_gateway_proxy_replies_suppressed() {
        let gw_mac = "aa:bb:cc:00:00:01";
        let mut devices = vec![
            ArpDevice {
                ip: "10.0.0.1".into(),
                mac: gw_mac.into(),
                vendor: None,
                status: "online".into(),
            },
            ArpDevice {
                ip: "10.0.0.2".into(),
                mac: gw_mac.to_uppercase(),
                vendor: None,
                status: "online".into(),
            },
            ArpDevice {
                ip: "10.0.0.3".into(),
                mac: "aa:bb:cc:00:00:03".into(),
                vendor: None,
                status: "online".into(),
            },
        ];
        suppress_proxy_replies(&mut devices, "10.0.0.1", gw_mac);

        // The gateway itself keeps its MAC.
        assert_eq!(devices[0].status, "online");
        assert_eq!(devices[0].mac, gw_mac);
        // The proxied host loses its borrowed MAC.
        assert_eq!(devices[1].status, "offline");
        assert!(devices[1].mac.is_empty());
        // Genuine hosts are untouched.
        assert_eq!(devices[2].status, "online");
    }
}
