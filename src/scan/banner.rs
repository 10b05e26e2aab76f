//! TCP banner grabbing.
//!
//! Connects, then accumulates whatever the peer volunteers until the read
//! window closes or the peer hangs up. The raw bytes are rendered two
//! ways: a spaced uppercase hex dump for the blob store, and a "human"
//! string keeping printable ASCII with `\r` `\n` `\t` as visible escapes.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use crate::config::BannerConfig;
use crate::error::ScanError;

pub struct BannerReader {
    conn_timeout: Duration,
    read_timeout: Duration,
}

impl BannerReader {
    pub fn new(cfg: &BannerConfig) -> Self {
        Self {
            conn_timeout: cfg.conn_timeout,
            read_timeout: cfg.read_timeout,
        }
    }

    pub async fn read(&self, host: &str, port: u16) -> Result<Vec<u8>, ScanError> {
        let mut stream = timeout(self.conn_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ScanError::Probe(format!("connect to {host}:{port} timed out")))?
            .map_err(|e| ScanError::Probe(format!("connect to {host}:{port} failed: {e}")))?;

        let deadline = Instant::now() + self.read_timeout;
        let mut buf = Vec::with_capacity(8192);
        let mut tmp = [0u8; 4096];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, stream.read(&mut tmp)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => buf.extend_from_slice(&tmp[..n]),
                Ok(Err(_)) | Err(_) => break,
            }
        }

        Ok(buf)
    }
}

/// `DE AD BE EF` rendering of the raw banner.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{b:02X}"));
    }
    out
}

/// Printable-ASCII projection; CR, LF and TAB survive as literal escapes,
/// everything else outside 0x20..=0x7e is dropped.
pub fn human_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[]), "");
        assert_eq!(hex_dump(&[0xde, 0xad, 0xbe, 0xef]), "DE AD BE EF");
        assert_eq!(hex_dump(&[0x00, 0x0a]), "00 0A");
    }

    #[test]
    fn test_human_string_escapes_and_filters() {
        assert_eq!(human_string(b"SSH-2.0\r\n"), "SSH-2.0\\r\\n");
        assert_eq!(human_string(b"a\tb"), "a\\tb");
        assert_eq!(human_string(&[0x00, 0x01, b'x', 0xff]), "x");
        assert_eq!(human_string(b""), "");
    }

    #[tokio::test]
    async fn test_reads_until_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"220 hello\r\n").await.unwrap();
            // Drop closes the connection, ending the read loop early.
        });

        let reader = BannerReader {
            conn_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(2),
        };
        let raw = reader.read("127.0.0.1", port).await.unwrap();
        assert_eq!(human_string(&raw), "220 hello\\r\\n");
    }

    #[tokio::test]
    async fn test_connect_failure_is_probe_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let reader = BannerReader {
            conn_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(500),
        };
        let err = reader.read("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, ScanError::Probe(_)));
    }
}
