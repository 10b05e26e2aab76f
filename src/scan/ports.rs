//! Port specification parser.
//!
//! Accepted forms: a single port (`80`), a comma list (`22,80,443`) and an
//! inclusive range (`1-1024`). Everything must land in 1..=65535.

use crate::error::ScanError;

pub fn parse_ports(spec: &str) -> Result<Vec<u16>, ScanError> {
    if spec.is_empty() {
        return Err(ScanError::Validation("ports string is empty".into()));
    }

    if spec.contains('-') {
        let parts: Vec<&str> = spec.split('-').collect();
        if parts.len() != 2 {
            return Err(ScanError::Validation("invalid port range format".into()));
        }
        let start = parse_port(parts[0])?;
        let end = parse_port(parts[1])?;
        if start > end {
            return Err(ScanError::Validation(
                "start port cannot be greater than end port".into(),
            ));
        }
        return Ok((start..=end).collect());
    }

    if spec.contains(',') {
        return spec.split(',').map(parse_port).collect();
    }

    Ok(vec![parse_port(spec)?])
}

fn parse_port(s: &str) -> Result<u16, ScanError> {
    let n: u32 = s
        .trim()
        .parse()
        .map_err(|_| ScanError::Validation(format!("invalid port number: {s:?}")))?;
    if !(1..=65535).contains(&n) {
        return Err(ScanError::Validation(format!(
            "port {n} is out of range (1-65535)"
        )));
    }
    Ok(n as u16)
}
