//! TCP banner worker: consumes `tcp_service`, grabs whatever the peer
//! volunteers, stores the hex dump in the blob store and the decoded
//! record in history, then replies with the object key.
//!
//! Persistence failures are logged and do not fail the scan; the raw
//! bytes never transit the broker, so this worker is the only place the
//! blob can be written.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info};

use scanhive::config::{BannerConfig, MinioConfig, MongoConfig, WorkerConfig};
use scanhive::history::blob::{object_key, BlobStore};
use scanhive::history::HistoryRepo;
use scanhive::models::{TcpBannerHistoryRecord, TcpBannerReply, TcpBannerRequest};
use scanhive::queue::worker::{self, ScanHandler};
use scanhive::queue::TCP_QUEUE;
use scanhive::scan::banner::{hex_dump, human_string, BannerReader};

struct TcpHandler {
    reader: BannerReader,
    blob: BlobStore,
    history: HistoryRepo,
}

impl TcpHandler {
    async fn persist(&self, req: &TcpBannerRequest, key: &str, hex: String, decoded: &str) {
        if let Err(e) = self.blob.put_hex(key, hex).await {
            error!("blob store put failed: {e}");
        }
        let record = TcpBannerHistoryRecord {
            id: None,
            task_id: req.task_id.clone(),
            host: req.host.clone(),
            port: req.port.clone(),
            hex_object_key: key.to_string(),
            decoded_text: decoded.to_string(),
            status: "completed".into(),
            error: String::new(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.history.save_tcp(record).await {
            error!("history insert failed: {e}");
        }
    }
}

#[async_trait]
impl ScanHandler for TcpHandler {
    async fn handle(&self, body: &[u8]) -> Result<Vec<u8>> {
        let req: TcpBannerRequest =
            serde_json::from_slice(body).context("unmarshal TCP banner request")?;
        info!("TCP read of {}:{} (task {})", req.host, req.port, req.task_id);

        let mut reply = TcpBannerReply {
            task_id: req.task_id.clone(),
            host: req.host.clone(),
            port: req.port.clone(),
            hex_object_key: String::new(),
            decoded_text: String::new(),
            status: "completed".into(),
            error: String::new(),
        };

        let outcome = match req.port.parse::<u16>() {
            Ok(port) => self.reader.read(&req.host, port).await,
            Err(_) => Err(scanhive::error::ScanError::Probe(format!(
                "invalid port {:?}",
                req.port
            ))),
        };

        match outcome {
            Ok(raw) => {
                let key = object_key(&req.task_id);
                let decoded = human_string(&raw);
                self.persist(&req, &key, hex_dump(&raw), &decoded).await;
                reply.hex_object_key = key;
                reply.decoded_text = decoded;
            }
            Err(e) => {
                reply.status = "failed".into();
                reply.error = e.to_string();
            }
        }

        Ok(serde_json::to_vec(&reply)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    scanhive::init_tracing();
    let cfg = WorkerConfig::from_env(TCP_QUEUE);

    let history = HistoryRepo::connect(&MongoConfig::from_env()).await?;
    let blob = BlobStore::connect(&MinioConfig::from_env()).await?;
    let handler = Arc::new(TcpHandler {
        reader: BannerReader::new(&BannerConfig::from_env()),
        blob,
        history,
    });
    worker::run(&cfg, handler).await
}
