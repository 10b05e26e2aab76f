//! Wire types shared by the gateway, the workers and the history store.
//!
//! Broker bodies are plain JSON. Requests are tagged by the queue they are
//! published to; replies are untagged on the wire (workers predate a tagged
//! envelope), so inbound replies are recovered by a try-each-shape cascade
//! in [`ScanReply::demux`]. Each shape is gated on its distinctive required
//! fields so a reply cannot be claimed by the wrong variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client-visible scan request envelope.
///
/// `service` accepts both the short form (`arp`, `icmp`, `nmap`,
/// `tcp_banner`) and the historical queue-name aliases
/// (`arp_service`, `ping_service`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEnvelope {
    #[serde(alias = "scanner_service")]
    pub service: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

// === Requests ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArpRequest {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub interface_name: String,
    #[serde(default)]
    pub ip_range: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcmpRequest {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub ping_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmapPortRequest {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub scanner_type: String,
    #[serde(default)]
    pub ports: String,
    #[serde(default)]
    pub scan_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmapOsRequest {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub scan_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmapHostRequest {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub scan_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpBannerRequest {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: String,
}

/// A typed request held in the gateway cache while its reply is pending.
///
/// Reply payloads omit the input parameters (interface name, port range,
/// targets), so the original request is needed to compose history records.
/// Serializes flat, exactly as the matching worker expects its body.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ScanRequest {
    Arp(ArpRequest),
    Icmp(IcmpRequest),
    NmapPort(NmapPortRequest),
    NmapOs(NmapOsRequest),
    NmapHost(NmapHostRequest),
    TcpBanner(TcpBannerRequest),
}

impl ScanRequest {
    pub fn task_id(&self) -> &str {
        match self {
            ScanRequest::Arp(r) => &r.task_id,
            ScanRequest::Icmp(r) => &r.task_id,
            ScanRequest::NmapPort(r) => &r.task_id,
            ScanRequest::NmapOs(r) => &r.task_id,
            ScanRequest::NmapHost(r) => &r.task_id,
            ScanRequest::TcpBanner(r) => &r.task_id,
        }
    }
}

// === Replies ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArpDevice {
    pub ip: String,
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    pub status: String,
}

impl ArpDevice {
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArpReply {
    pub task_id: String,
    #[serde(default)]
    pub status: String,
    pub devices: Vec<ArpDevice>,
    #[serde(default)]
    pub online_devices: Vec<ArpDevice>,
    #[serde(default)]
    pub offline_devices: Vec<ArpDevice>,
    pub total_count: usize,
    #[serde(default)]
    pub online_count: usize,
    #[serde(default)]
    pub offline_count: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcmpResult {
    pub target: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub packets_sent: i32,
    #[serde(default)]
    pub packets_received: i32,
    #[serde(default)]
    pub packet_loss_percent: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcmpReply {
    pub task_id: String,
    #[serde(default)]
    pub status: String,
    pub results: Vec<IcmpResult>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Parallel-array port listing, kept shape-compatible with the wire
/// format the workers have always produced (`close_ports` carries every
/// scanned port, open or not).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NmapPortInfo {
    #[serde(default)]
    pub status: String,
    #[serde(rename = "close_ports", default)]
    pub all_ports: Vec<u16>,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub state: Vec<String>,
    #[serde(default)]
    pub service_name: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmapPortReply {
    pub task_id: String,
    #[serde(default)]
    pub host: String,
    pub port_info: Vec<NmapPortInfo>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmapOsReply {
    pub task_id: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub name: String,
    pub accuracy: i32,
    #[serde(default)]
    pub vendor: String,
    pub family: String,
    #[serde(rename = "type", default)]
    pub os_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmapHostReply {
    pub task_id: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub host_up: i32,
    pub host_total: i32,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub dns: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpBannerReply {
    pub task_id: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: String,
    pub hex_object_key: String,
    #[serde(default)]
    pub decoded_text: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Catch-all `{task_id, result}` envelope, used for router-synthesized
/// failure replies and tolerated on the wire for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericReply {
    pub task_id: String,
    pub result: serde_json::Value,
}

/// A demultiplexed worker reply.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ScanReply {
    Arp(ArpReply),
    Generic(GenericReply),
    Icmp(IcmpReply),
    NmapPort(NmapPortReply),
    NmapOs(NmapOsReply),
    NmapHost(NmapHostReply),
    TcpBanner(TcpBannerReply),
}

impl ScanReply {
    pub fn task_id(&self) -> &str {
        match self {
            ScanReply::Arp(r) => &r.task_id,
            ScanReply::Generic(r) => &r.task_id,
            ScanReply::Icmp(r) => &r.task_id,
            ScanReply::NmapPort(r) => &r.task_id,
            ScanReply::NmapOs(r) => &r.task_id,
            ScanReply::NmapHost(r) => &r.task_id,
            ScanReply::TcpBanner(r) => &r.task_id,
        }
    }

    /// Recover a reply from an untagged wire body.
    ///
    /// Shapes are attempted most-specific first; the first parse that
    /// yields a non-empty `task_id` wins. `None` means the body matched
    /// no known variant and must be dropped by the caller.
    pub fn demux(body: &[u8]) -> Option<ScanReply> {
        if let Ok(r) = serde_json::from_slice::<ArpReply>(body) {
            if !r.task_id.is_empty() {
                return Some(ScanReply::Arp(r));
            }
        }
        if let Ok(r) = serde_json::from_slice::<GenericReply>(body) {
            if !r.task_id.is_empty() {
                return Some(ScanReply::Generic(r));
            }
        }
        if let Ok(r) = serde_json::from_slice::<IcmpReply>(body) {
            if !r.task_id.is_empty() {
                return Some(ScanReply::Icmp(r));
            }
        }
        if let Ok(r) = serde_json::from_slice::<NmapPortReply>(body) {
            if !r.task_id.is_empty() {
                return Some(ScanReply::NmapPort(r));
            }
        }
        if let Ok(r) = serde_json::from_slice::<NmapOsReply>(body) {
            if !r.task_id.is_empty() {
                return Some(ScanReply::NmapOs(r));
            }
        }
        if let Ok(r) = serde_json::from_slice::<NmapHostReply>(body) {
            if !r.task_id.is_empty() {
                return Some(ScanReply::NmapHost(r));
            }
        }
        if let Ok(r) = serde_json::from_slice::<TcpBannerReply>(body) {
            if !r.task_id.is_empty() {
                return Some(ScanReply::TcpBanner(r));
            }
        }
        None
    }

    /// Failure reply synthesized by the gateway when no worker answered.
    pub fn failed(task_id: &str, error: &str) -> ScanReply {
        ScanReply::Generic(GenericReply {
            task_id: task_id.to_string(),
            result: serde_json::json!({ "status": "failed", "error": error }),
        })
    }
}

// === History records ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArpHistoryRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<bson::oid::ObjectId>,
    pub task_id: String,
    #[serde(default)]
    pub interface_name: String,
    #[serde(default)]
    pub ip_range: String,
    pub status: String,
    pub devices: Vec<ArpDevice>,
    pub online_devices: Vec<ArpDevice>,
    pub offline_devices: Vec<ArpDevice>,
    pub total_count: usize,
    pub online_count: usize,
    pub offline_count: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcmpHistoryRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<bson::oid::ObjectId>,
    pub task_id: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub ping_count: i32,
    pub status: String,
    pub results: Vec<IcmpResult>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmapPortHistoryRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<bson::oid::ObjectId>,
    pub task_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub scanner_type: String,
    #[serde(default)]
    pub ports: String,
    #[serde(default)]
    pub host: String,
    pub port_info: Vec<NmapPortInfo>,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmapOsHistoryRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<bson::oid::ObjectId>,
    pub task_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub host: String,
    pub name: String,
    pub accuracy: i32,
    pub vendor: String,
    pub family: String,
    #[serde(rename = "type")]
    pub os_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmapHostHistoryRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<bson::oid::ObjectId>,
    pub task_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub host: String,
    pub host_up: i32,
    pub host_total: i32,
    pub status: String,
    #[serde(default)]
    pub dns: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpBannerHistoryRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<bson::oid::ObjectId>,
    pub task_id: String,
    pub host: String,
    pub port: String,
    pub hex_object_key: String,
    pub decoded_text: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub created_at: DateTime<Utc>,
}

/// Envelope for every history REST response.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl HistoryResponse {
    pub fn ok(data: serde_json::Value, count: Option<usize>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            count,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            count: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demux_arp() {
        let body = serde_json::json!({
            "task_id": "arp-1",
            "status": "completed",
            "devices": [
                {"ip": "10.0.0.1", "mac": "aa:bb:cc:dd:ee:ff", "status": "online"},
                {"ip": "10.0.0.2", "mac": "", "status": "offline"}
            ],
            "online_devices": [],
            "offline_devices": [],
            "total_count": 2,
            "online_count": 1,
            "offline_count": 1
        });
        let reply = ScanReply::demux(body.to_string().as_bytes()).unwrap();
        match reply {
            ScanReply::Arp(r) => {
                assert_eq!(r.task_id, "arp-1");
                assert_eq!(r.devices.len(), 2);
                assert_eq!(r.total_count, 2);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_demux_icmp_not_claimed_by_generic() {
        let body = serde_json::json!({
            "task_id": "icmp-1",
            "status": "completed",
            "results": [{
                "target": "127.0.0.1",
                "address": "127.0.0.1",
                "packets_sent": 4,
                "packets_received": 4,
                "packet_loss_percent": 0.0
            }]
        });
        let reply = ScanReply::demux(body.to_string().as_bytes()).unwrap();
        assert!(matches!(reply, ScanReply::Icmp(_)));
    }

    #[test]
    fn test_demux_nmap_variants() {
        let port = serde_json::json!({
            "task_id": "t1", "host": "127.0.0.1", "status": "completed",
            "port_info": [{
                "status": "up",
                "close_ports": [1, 2, 3],
                "protocols": ["tcp", "tcp", "tcp"],
                "state": ["closed", "open", "closed"],
                "service_name": ["tcpmux", "unknown", "unknown"]
            }]
        });
        assert!(matches!(
            ScanReply::demux(port.to_string().as_bytes()).unwrap(),
            ScanReply::NmapPort(_)
        ));

        let os = serde_json::json!({
            "task_id": "t2", "host": "127.0.0.1", "name": "Linux 5.X",
            "accuracy": 95, "vendor": "Linux", "family": "Linux",
            "type": "general purpose", "status": "completed"
        });
        assert!(matches!(
            ScanReply::demux(os.to_string().as_bytes()).unwrap(),
            ScanReply::NmapOs(_)
        ));

        let host = serde_json::json!({
            "task_id": "t3", "host": "127.0.0.1", "host_up": 1,
            "host_total": 1, "status": "up", "dns": "localhost",
            "reason": "conn-refused"
        });
        assert!(matches!(
            ScanReply::demux(host.to_string().as_bytes()).unwrap(),
            ScanReply::NmapHost(_)
        ));
    }

    #[test]
    fn test_demux_tcp_banner() {
        let body = serde_json::json!({
            "task_id": "tcp-1", "host": "telehack.com", "port": "23",
            "hex_object_key": "tcp-1_1700000000.hex",
            "decoded_text": "Connected to TELEHACK", "status": "completed"
        });
        assert!(matches!(
            ScanReply::demux(body.to_string().as_bytes()).unwrap(),
            ScanReply::TcpBanner(_)
        ));
    }

    #[test]
    fn test_demux_rejects_empty_task_id_and_garbage() {
        let anonymous = serde_json::json!({
            "task_id": "", "result": {"error": "nope"}
        });
        assert!(ScanReply::demux(anonymous.to_string().as_bytes()).is_none());
        assert!(ScanReply::demux(b"not json at all").is_none());
        assert!(ScanReply::demux(b"{\"unrelated\": true}").is_none());
    }

    #[test]
    fn test_failed_reply_carries_task_id_and_error() {
        let reply = ScanReply::failed("nmap-9", "rpc timeout for queue nmap_service");
        assert_eq!(reply.task_id(), "nmap-9");
        let wire = serde_json::to_vec(&reply).unwrap();
        let round = ScanReply::demux(&wire).unwrap();
        match round {
            ScanReply::Generic(g) => {
                assert!(g.result["error"].as_str().unwrap().contains("timeout"));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_envelope_accepts_both_service_spellings() {
        let short: ScanEnvelope =
            serde_json::from_str(r#"{"service": "arp", "options": {}}"#).unwrap();
        assert_eq!(short.service, "arp");
        let legacy: ScanEnvelope =
            serde_json::from_str(r#"{"scanner_service": "arp_service", "options": {}}"#).unwrap();
        assert_eq!(legacy.service, "arp_service");
    }

    #[test]
    fn test_requests_serialize_flat_for_workers() {
        let req = ScanRequest::NmapPort(NmapPortRequest {
            task_id: "nmap-tcpudp-1".into(),
            ip: "127.0.0.1".into(),
            scanner_type: "TCP".into(),
            ports: "1-3".into(),
            scan_method: "tcp_udp_scan".into(),
        });
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["task_id"], "nmap-tcpudp-1");
        assert_eq!(wire["scan_method"], "tcp_udp_scan");
        assert_eq!(wire["scanner_type"], "TCP");
        // No enum tag leaks onto the wire.
        assert!(wire.get("NmapPort").is_none());

        let req = ScanRequest::Arp(ArpRequest {
            task_id: "arp-1".into(),
            interface_name: "eth0".into(),
            ip_range: "10.0.0.0/24".into(),
        });
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["interface_name"], "eth0");
        assert_eq!(wire["ip_range"], "10.0.0.0/24");
    }

    #[test]
    fn test_port_info_wire_name() {
        let info = NmapPortInfo {
            status: "up".into(),
            all_ports: vec![22],
            protocols: vec!["tcp".into()],
            state: vec!["open".into()],
            service_name: vec!["ssh".into()],
        };
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("close_ports").is_some());
        assert!(json.get("all_ports").is_none());
    }
}
