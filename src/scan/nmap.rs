//! Adapter around the external Nmap engine.
//!
//! Nmap is spawned with `-oX -` and the XML on stdout is scanned for the
//! handful of attributes each mode needs. Every mode runs under its own
//! wall-clock deadline; an expired deadline kills the child process.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::ScanError;
use crate::models::NmapPortInfo;

pub const TCP_UDP_DEADLINE: Duration = Duration::from_secs(120);
pub const OS_DETECTION_DEADLINE: Duration = Duration::from_secs(300);
pub const HOST_DISCOVERY_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct PortScanOutcome {
    pub host: String,
    pub port_info: NmapPortInfo,
}

#[derive(Debug)]
pub struct OsDetectionOutcome {
    pub host: String,
    pub name: String,
    pub accuracy: i32,
    pub vendor: String,
    pub family: String,
    pub os_type: String,
}

impl Default for OsDetectionOutcome {
    fn default() -> Self {
        Self {
            host: String::new(),
            name: "unknown".into(),
            accuracy: 0,
            vendor: "unknown".into(),
            family: "unknown".into(),
            os_type: "unknown".into(),
        }
    }
}

#[derive(Debug)]
pub struct HostDiscoveryOutcome {
    pub host: String,
    pub host_up: i32,
    pub host_total: i32,
    pub status: String,
    pub dns: String,
    pub reason: String,
}

impl Default for HostDiscoveryOutcome {
    fn default() -> Self {
        Self {
            host: String::new(),
            host_up: 0,
            host_total: 0,
            status: "unknown".into(),
            dns: "unknown".into(),
            reason: "unknown".into(),
        }
    }
}

pub struct NmapScanner {
    binary: String,
}

impl Default for NmapScanner {
    fn default() -> Self {
        Self {
            binary: "nmap".into(),
        }
    }
}

impl NmapScanner {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    /// Connect-scan (`TCP`) or UDP-scan a single host over a port spec.
    pub async fn port_scan(
        &self,
        target: &str,
        ports: &str,
        scanner_type: &str,
    ) -> Result<PortScanOutcome, ScanError> {
        let scan_flag = if scanner_type.eq_ignore_ascii_case("UDP") {
            "-sU"
        } else {
            "-sT"
        };
        let xml = self
            .run(
                &[scan_flag, "-p", ports, "-Pn", "-T3", "-oX", "-", target],
                TCP_UDP_DEADLINE,
            )
            .await?;
        Ok(parse_port_scan(&xml))
    }

    /// OS detection with match guessing; all fields default to "unknown"
    /// when nothing matched.
    pub async fn os_detection(&self, target: &str) -> Result<OsDetectionOutcome, ScanError> {
        let xml = self
            .run(
                &["-O", "--osscan-guess", "-oX", "-", target],
                OS_DETECTION_DEADLINE,
            )
            .await?;
        Ok(parse_os_detection(&xml))
    }

    /// Ping-scan, aggregating up/total and the primary host's state.
    pub async fn host_discovery(&self, target: &str) -> Result<HostDiscoveryOutcome, ScanError> {
        let xml = self
            .run(&["-sn", "-oX", "-", target], HOST_DISCOVERY_DEADLINE)
            .await?;
        Ok(parse_host_discovery(&xml))
    }

    async fn run(&self, args: &[&str], deadline: Duration) -> Result<String, ScanError> {
        debug!("running {} {}", self.binary, args.join(" "));
        let child = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScanError::Probe(format!("failed to spawn {}: {e}", self.binary)))?;

        // Dropping the timed-out future kills the child via kill_on_drop.
        let output = timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| ScanError::Probe(format!("nmap timed out after {deadline:?}")))?
            .map_err(|e| ScanError::Probe(format!("nmap failed: {e}")))?;

        if !output.status.success() {
            return Err(ScanError::Probe(format!(
                "nmap exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// First value of ` key="..."` in `fragment`. The leading space keeps
/// `type` from matching `addrtype` and `family` from matching `osfamily`.
fn attr<'a>(fragment: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!(" {key}=\"");
    let start = fragment.find(&pattern)? + pattern.len();
    let rest = &fragment[start..];
    Some(&rest[..rest.find('"')?])
}

fn first_address(xml: &str) -> String {
    xml.find("<address ")
        .and_then(|i| attr(&xml[i..], "addr"))
        .unwrap_or_default()
        .to_string()
}

fn parse_port_scan(xml: &str) -> PortScanOutcome {
    let mut info = NmapPortInfo {
        status: xml
            .find("<status ")
            .and_then(|i| attr(&xml[i..], "state"))
            .unwrap_or("unknown")
            .to_string(),
        all_ports: Vec::new(),
        protocols: Vec::new(),
        state: Vec::new(),
        service_name: Vec::new(),
    };

    for chunk in xml.split("<port ").skip(1) {
        let chunk = chunk.split("</port>").next().unwrap_or(chunk);
        let Some(port) = attr(&format!(" {chunk}"), "portid").and_then(|v| v.parse::<u16>().ok())
        else {
            continue;
        };
        info.all_ports.push(port);
        info.protocols.push(
            attr(&format!(" {chunk}"), "protocol")
                .unwrap_or("tcp")
                .to_string(),
        );
        info.state.push(
            chunk
                .find("<state ")
                .and_then(|i| attr(&chunk[i..], "state"))
                .unwrap_or("unknown")
                .to_string(),
        );
        info.service_name.push(
            chunk
                .find("<service ")
                .and_then(|i| attr(&chunk[i..], "name"))
                .filter(|s| !s.is_empty())
                .unwrap_or("unknown")
                .to_string(),
        );
    }

    PortScanOutcome {
        host: first_address(xml),
        port_info: info,
    }
}

fn parse_os_detection(xml: &str) -> OsDetectionOutcome {
    let mut outcome = OsDetectionOutcome {
        host: first_address(xml),
        ..Default::default()
    };

    let Some(start) = xml.find("<osmatch ") else {
        return outcome;
    };
    let chunk = &xml[start..];
    let chunk = chunk.split("</osmatch>").next().unwrap_or(chunk);

    if let Some(name) = attr(chunk, "name") {
        outcome.name = name.to_string();
    }
    if let Some(acc) = attr(chunk, "accuracy").and_then(|v| v.parse().ok()) {
        outcome.accuracy = acc;
    }
    if let Some(class_at) = chunk.find("<osclass ") {
        let class = &chunk[class_at..];
        if let Some(vendor) = attr(class, "vendor") {
            outcome.vendor = vendor.to_string();
        }
        if let Some(family) = attr(class, "osfamily") {
            outcome.family = family.to_string();
        }
        if let Some(os_type) = attr(class, "type") {
            outcome.os_type = os_type.to_string();
        }
    }
    outcome
}

fn parse_host_discovery(xml: &str) -> HostDiscoveryOutcome {
    let mut outcome = HostDiscoveryOutcome {
        host: first_address(xml),
        ..Default::default()
    };

    for chunk in xml.split("<status ").skip(1) {
        outcome.host_total += 1;
        if attr(&format!(" {chunk}"), "state") == Some("up") {
            outcome.host_up += 1;
        }
    }

    if let Some(i) = xml.find("<status ") {
        if let Some(state) = attr(&xml[i..], "state") {
            outcome.status = state.to_string();
        }
        if let Some(reason) = attr(&xml[i..], "reason") {
            outcome.reason = reason.to_string();
        }
    }
    if let Some(i) = xml.find("<hostname ") {
        if let Some(name) = attr(&xml[i..], "name") {
            outcome.dns = name.to_string();
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORT_XML: &str = r#"<nmaprun>
<host starttime="1"><status state="up" reason="user-set" reason_ttl="0"/>
<address addr="127.0.0.1" addrtype="ipv4"/>
<ports>
<port protocol="tcp" portid="1"><state state="closed" reason="conn-refused" reason_ttl="0"/><service name="tcpmux" method="table" conf="3"/></port>
<port protocol="tcp" portid="2"><state state="open" reason="syn-ack" reason_ttl="0"/></port>
<port protocol="tcp" portid="3"><state state="closed" reason="conn-refused" reason_ttl="0"/><service name="" method="table" conf="3"/></port>
</ports>
</host>
</nmaprun>"#;

    const OS_XML: &str = r#"<nmaprun>
<host><status state="up" reason="localhost-response" reason_ttl="0"/>
<address addr="192.168.1.10" addrtype="ipv4"/>
<os><portused state="open" proto="tcp" portid="22"/>
<osmatch name="Linux 5.0 - 5.14" accuracy="95" line="67000">
<osclass type="general purpose" vendor="Linux" osfamily="Linux" osgen="5.X" accuracy="95"><cpe>cpe:/o:linux:linux_kernel:5</cpe></osclass>
</osmatch>
</os>
</host>
</nmaprun>"#;

    const HOST_XML: &str = r#"<nmaprun>
<host><status state="up" reason="syn-ack" reason_ttl="0"/>
<address addr="45.33.32.156" addrtype="ipv4"/>
<hostnames><hostname name="scanme.nmap.org" type="user"/></hostnames>
</host>
<host><status state="down" reason="no-response" reason_ttl="0"/>
<address addr="45.33.32.157" addrtype="ipv4"/>
</host>
</nmaprun>"#;

    #[test]
    fn test_parse_port_scan() {
        let outcome = parse_port_scan(PORT_XML);
        assert_eq!(outcome.host, "127.0.0.1");
        assert_eq!(outcome.port_info.status, "up");
        assert_eq!(outcome.port_info.all_ports, vec![1, 2, 3]);
        assert_eq!(outcome.port_info.state, vec!["closed", "open", "closed"]);
        assert_eq!(outcome.port_info.protocols, vec!["tcp", "tcp", "tcp"]);
        // Missing or empty service names fall back to "unknown".
        assert_eq!(
            outcome.port_info.service_name,
            vec!["tcpmux", "unknown", "unknown"]
        );
    }

    #[test]
    fn test_parse_port_scan_open_port_position() {
        let outcome = parse_port_scan(PORT_XML);
        let idx = outcome
            .port_info
            .all_ports
            .iter()
            .position(|&p| p == 2)
            .unwrap();
        assert_eq!(outcome.port_info.state[idx], "open");
    }

    #[test]
    fn test_parse_os_detection() {
        let outcome = parse_os_detection(OS_XML);
        assert_eq!(outcome.host, "192.168.1.10");
        assert_eq!(outcome.name, "Linux 5.0 - 5.14");
        assert_eq!(outcome.accuracy, 95);
        assert_eq!(outcome.vendor, "Linux");
        assert_eq!(outcome.family, "Linux");
        assert_eq!(outcome.os_type, "general purpose");
    }

    #[test]
    fn test_parse_os_detection_no_match_defaults_unknown() {
        let outcome = parse_os_detection("<nmaprun><host><address addr=\"10.0.0.1\" addrtype=\"ipv4\"/></host></nmaprun>");
        assert_eq!(outcome.host, "10.0.0.1");
        assert_eq!(outcome.name, "unknown");
        assert_eq!(outcome.accuracy, 0);
        assert_eq!(outcome.vendor, "unknown");
        assert_eq!(outcome.family, "unknown");
        assert_eq!(outcome.os_type, "unknown");
    }

    #[test]
    fn test_parse_host_discovery() {
        let outcome = parse_host_discovery(HOST_XML);
        assert_eq!(outcome.host, "45.33.32.156");
        assert_eq!(outcome.host_up, 1);
        assert_eq!(outcome.host_total, 2);
        assert_eq!(outcome.status, "up");
        assert_eq!(outcome.reason, "syn-ack");
        assert_eq!(outcome.dns, "scanme.nmap.org");
    }

    #[test]
    fn test_attr_does_not_match_suffixes() {
        let frag = r#"<osclass type="general purpose" vendor="Linux" osfamily="Linux" addrtype="ipv4""#;
        assert_eq!(attr(frag, "type"), Some("general purpose"));
        assert_eq!(attr(frag, "family"), None);
        assert_eq!(attr(frag, "osfamily"), Some("Linux"));
    }

    #[test]
    fn test_empty_xml_yields_defaults() {
        let outcome = parse_port_scan("");
        assert!(outcome.host.is_empty());
        assert!(outcome.port_info.all_ports.is_empty());
        let hosts = parse_host_discovery("");
        assert_eq!(hosts.host_total, 0);
    }
}
