//! Gateway-side request routing.
//!
//! Parses the polymorphic envelope into the service-typed request,
//! applies defaults, assigns a task id when the client sent none, parks
//! the request in the cache and drives the RPC call. An RPC timeout is
//! surfaced to the client as a failed reply that still carries the task
//! id; the cache entry stays behind for a late reply to reconcile.

use std::sync::Arc;

use tracing::warn;

use crate::cache::RequestCache;
use crate::error::ScanError;
use crate::models::{
    ArpRequest, IcmpRequest, NmapHostRequest, NmapOsRequest, NmapPortRequest, ScanEnvelope,
    ScanReply, ScanRequest, TcpBannerRequest,
};
use crate::queue::rpc::RpcClient;
use crate::queue::{ARP_QUEUE, ICMP_QUEUE, NMAP_QUEUE, TCP_QUEUE};

pub struct ScanRouter {
    rpc: Arc<RpcClient>,
    cache: Arc<RequestCache>,
}

impl ScanRouter {
    pub fn new(rpc: Arc<RpcClient>, cache: Arc<RequestCache>) -> Self {
        Self { rpc, cache }
    }

    pub async fn handle_envelope(&self, envelope: &ScanEnvelope) -> Result<ScanReply, ScanError> {
        let (queue, request) = prepare(envelope)?;
        self.cache.insert(request.clone());

        match self.rpc.call(queue, &request).await {
            Ok(reply) => Ok(reply),
            Err(ScanError::Timeout(q)) => {
                warn!("no reply from {q} for task {}", request.task_id());
                Ok(ScanReply::failed(
                    request.task_id(),
                    &format!("rpc timeout for queue {q}"),
                ))
            }
            Err(e) => Err(e),
        }
    }
}

/// Validate an envelope into its typed request and target queue.
pub fn prepare(envelope: &ScanEnvelope) -> Result<(&'static str, ScanRequest), ScanError> {
    match envelope.service.as_str() {
        "arp" | "arp_service" => prepare_arp(&envelope.options),
        "icmp" | "icmp_service" | "ping_service" => prepare_icmp(&envelope.options),
        "nmap" | "nmap_service" => prepare_nmap(&envelope.options),
        "tcp_banner" | "tcp_service" => prepare_tcp_banner(&envelope.options),
        other => Err(ScanError::Validation(format!(
            "unsupported scanner_service: {other}"
        ))),
    }
}

fn prepare_arp(options: &serde_json::Value) -> Result<(&'static str, ScanRequest), ScanError> {
    let mut req: ArpRequest = parse_options(options, "ARP")?;
    if req.interface_name.is_empty() {
        return Err(ScanError::Validation(
            "interface_name is required for ARP scan".into(),
        ));
    }
    if req.ip_range.is_empty() {
        return Err(ScanError::Validation(
            "ip_range is required for ARP scan".into(),
        ));
    }
    if req.task_id.is_empty() {
        req.task_id = generate_task_id("arp");
    }
    Ok((ARP_QUEUE, ScanRequest::Arp(req)))
}

fn prepare_icmp(options: &serde_json::Value) -> Result<(&'static str, ScanRequest), ScanError> {
    let mut req: IcmpRequest = parse_options(options, "ICMP")?;
    if req.targets.is_empty() {
        return Err(ScanError::Validation(
            "targets are required for ICMP ping".into(),
        ));
    }
    if req.ping_count <= 0 {
        req.ping_count = 4;
    }
    if req.task_id.is_empty() {
        req.task_id = generate_task_id("icmp");
    }
    Ok((ICMP_QUEUE, ScanRequest::Icmp(req)))
}

fn prepare_nmap(options: &serde_json::Value) -> Result<(&'static str, ScanRequest), ScanError> {
    #[derive(serde::Deserialize, Default)]
    #[serde(default)]
    struct NmapOptions {
        task_id: String,
        ip: String,
        ports: String,
        scanner_type: String,
        scan_method: String,
    }

    let opts: NmapOptions = parse_options(options, "Nmap")?;

    if opts.scan_method == "tcp_udp_scan" || opts.scanner_type == "tcp_udp_scan" {
        if opts.ip.is_empty() {
            return Err(ScanError::Validation("IP is required for TCP/UDP scan".into()));
        }
        if opts.scanner_type != "TCP" && opts.scanner_type != "UDP" {
            return Err(ScanError::Validation(
                "ScannerType must be 'TCP' or 'UDP'".into(),
            ));
        }
        let req = NmapPortRequest {
            task_id: non_empty_or(opts.task_id, || generate_task_id("nmap-tcpudp")),
            ip: opts.ip,
            scanner_type: opts.scanner_type,
            ports: non_empty_or(opts.ports, || "1-1000".to_string()),
            scan_method: "tcp_udp_scan".into(),
        };
        return Ok((NMAP_QUEUE, ScanRequest::NmapPort(req)));
    }

    match opts.scan_method.as_str() {
        "os_detection" => {
            if opts.ip.is_empty() {
                return Err(ScanError::Validation("IP is required for OS detection".into()));
            }
            let req = NmapOsRequest {
                task_id: non_empty_or(opts.task_id, || generate_task_id("nmap-os")),
                ip: opts.ip,
                scan_method: "os_detection".into(),
            };
            Ok((NMAP_QUEUE, ScanRequest::NmapOs(req)))
        }
        "host_discovery" => {
            if opts.ip.is_empty() {
                return Err(ScanError::Validation(
                    "IP is required for host discovery".into(),
                ));
            }
            let req = NmapHostRequest {
                task_id: non_empty_or(opts.task_id, || generate_task_id("nmap-host")),
                ip: opts.ip,
                scan_method: "host_discovery".into(),
            };
            Ok((NMAP_QUEUE, ScanRequest::NmapHost(req)))
        }
        other => Err(ScanError::Validation(format!(
            "unsupported nmap scan method: {other}"
        ))),
    }
}

fn prepare_tcp_banner(options: &serde_json::Value) -> Result<(&'static str, ScanRequest), ScanError> {
    let mut req: TcpBannerRequest = parse_options(options, "TCP banner")?;
    if req.host.is_empty() {
        return Err(ScanError::Validation(
            "host is required for TCP banner read".into(),
        ));
    }
    if req.port.is_empty() {
        return Err(ScanError::Validation(
            "port is required for TCP banner read".into(),
        ));
    }
    if req.task_id.is_empty() {
        req.task_id = generate_task_id("tcp");
    }
    Ok((TCP_QUEUE, ScanRequest::TcpBanner(req)))
}

fn parse_options<T: serde::de::DeserializeOwned>(
    options: &serde_json::Value,
    what: &str,
) -> Result<T, ScanError> {
    serde_json::from_value(options.clone())
        .map_err(|e| ScanError::Validation(format!("invalid {what} options: {e}")))
}

fn non_empty_or(value: String, fallback: impl FnOnce() -> String) -> String {
    if value.is_empty() {
        fallback()
    } else {
        value
    }
}

fn generate_task_id(prefix: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{prefix}-{nanos}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(service: &str, options: serde_json::Value) -> ScanEnvelope {
        ScanEnvelope {
            service: service.into(),
            options,
        }
    }

    #[test]
    fn test_unknown_service_rejected() {
        let err = prepare(&envelope("smb", serde_json::json!({}))).unwrap_err();
        assert!(matches!(err, ScanError::Validation(_)));
    }

    #[test]
    fn test_arp_requires_interface_and_range() {
        let err = prepare(&envelope(
            "arp",
            serde_json::json!({"ip_range": "10.0.0.0/24"}),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("interface_name"));

        let err = prepare(&envelope(
            "arp",
            serde_json::json!({"interface_name": "eth0"}),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("ip_range"));
    }

    #[test]
    fn test_arp_keeps_client_task_id() {
        let (queue, req) = prepare(&envelope(
            "arp_service",
            serde_json::json!({
                "task_id": "client-chosen",
                "interface_name": "eth0",
                "ip_range": "10.0.0.0/30"
            }),
        ))
        .unwrap();
        assert_eq!(queue, ARP_QUEUE);
        assert_eq!(req.task_id(), "client-chosen");
    }

    #[test]
    fn test_icmp_defaults_ping_count() {
        let (queue, req) = prepare(&envelope(
            "icmp",
            serde_json::json!({"targets": ["127.0.0.1"], "ping_count": 0}),
        ))
        .unwrap();
        assert_eq!(queue, ICMP_QUEUE);
        match req {
            ScanRequest::Icmp(r) => {
                assert_eq!(r.ping_count, 4);
                assert!(r.task_id.starts_with("icmp-"));
            }
            other => panic!("wrong request: {other:?}"),
        }
    }

    #[test]
    fn test_icmp_requires_targets() {
        let err = prepare(&envelope("icmp", serde_json::json!({"targets": []}))).unwrap_err();
        assert!(err.to_string().contains("targets"));
    }

    #[test]
    fn test_nmap_tcp_udp_defaults_and_validation() {
        let (queue, req) = prepare(&envelope(
            "nmap",
            serde_json::json!({
                "scan_method": "tcp_udp_scan",
                "scanner_type": "TCP",
                "ip": "127.0.0.1",
                "ports": "",
                "task_id": ""
            }),
        ))
        .unwrap();
        assert_eq!(queue, NMAP_QUEUE);
        match req {
            ScanRequest::NmapPort(r) => {
                assert_eq!(r.ports, "1-1000");
                assert_eq!(r.scan_method, "tcp_udp_scan");
                assert!(r.task_id.starts_with("nmap-tcpudp-"));
            }
            other => panic!("wrong request: {other:?}"),
        }

        let err = prepare(&envelope(
            "nmap",
            serde_json::json!({
                "scan_method": "tcp_udp_scan",
                "scanner_type": "ICMP",
                "ip": "127.0.0.1"
            }),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("ScannerType"));
    }

    #[test]
    fn test_nmap_os_and_host_require_ip() {
        for method in ["os_detection", "host_discovery"] {
            let err = prepare(&envelope(
                "nmap",
                serde_json::json!({"scan_method": method}),
            ))
            .unwrap_err();
            assert!(err.to_string().contains("IP is required"), "{method}");
        }
    }

    #[test]
    fn test_nmap_unknown_method_rejected() {
        let err = prepare(&envelope(
            "nmap",
            serde_json::json!({"scan_method": "xmas_scan", "ip": "127.0.0.1"}),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("unsupported nmap scan method"));
    }

    #[test]
    fn test_tcp_banner_requires_host_and_port() {
        let err = prepare(&envelope("tcp_banner", serde_json::json!({"port": "23"})))
            .unwrap_err();
        assert!(err.to_string().contains("host"));

        let (queue, req) = prepare(&envelope(
            "tcp_banner",
            serde_json::json!({"host": "telehack.com", "port": "23"}),
        ))
        .unwrap();
        assert_eq!(queue, TCP_QUEUE);
        assert!(req.task_id().starts_with("tcp-"));
    }

    #[test]
    fn test_generated_task_ids_are_prefixed_and_distinct() {
        let a = generate_task_id("arp");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = generate_task_id("arp");
        assert!(a.starts_with("arp-"));
        assert_ne!(a, b);
    }
}
