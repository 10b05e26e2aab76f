//! Long-term scan history in MongoDB.
//!
//! One collection per reply variant, append-only. Records get their
//! `created_at` stamped at insert; listings come back newest first.

pub mod blob;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bson::{doc, Document};
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::{Client, Database};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::config::MongoConfig;
use crate::models::{
    ArpHistoryRecord, IcmpHistoryRecord, NmapHostHistoryRecord, NmapOsHistoryRecord,
    NmapPortHistoryRecord, TcpBannerHistoryRecord,
};

pub const ARP_COLLECTION: &str = "arp_history";
pub const ICMP_COLLECTION: &str = "icmp_history";
pub const NMAP_TCP_UDP_COLLECTION: &str = "nmap_tcp_udp_history";
pub const NMAP_OS_COLLECTION: &str = "nmap_os_detection_history";
pub const NMAP_HOST_COLLECTION: &str = "nmap_host_discovery_history";
pub const TCP_COLLECTION: &str = "tcp_history";

/// The insert surface the result pipeline depends on; kept as a trait so
/// the pipeline is testable without a running database.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save_arp(&self, record: ArpHistoryRecord) -> Result<()>;
    async fn save_icmp(&self, record: IcmpHistoryRecord) -> Result<()>;
    async fn save_nmap_port(&self, record: NmapPortHistoryRecord) -> Result<()>;
    async fn save_nmap_os(&self, record: NmapOsHistoryRecord) -> Result<()>;
    async fn save_nmap_host(&self, record: NmapHostHistoryRecord) -> Result<()>;
}

#[derive(Clone)]
pub struct HistoryRepo {
    db: Database,
}

impl HistoryRepo {
    pub async fn connect(cfg: &MongoConfig) -> Result<Self> {
        let client = Client::with_uri_str(&cfg.uri)
            .await
            .with_context(|| format!("failed to connect to MongoDB at {}", cfg.uri))?;
        info!("connected to MongoDB, database={}", cfg.database);
        Ok(Self {
            db: client.database(&cfg.database),
        })
    }

    async fn insert<T: Serialize + Send + Sync>(&self, collection: &str, record: &T) -> Result<()> {
        self.db
            .collection::<T>(collection)
            .insert_one(record)
            .await
            .with_context(|| format!("insert into {collection} failed"))?;
        Ok(())
    }

    async fn list<T>(&self, collection: &str, limit: i64) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + Sync + Unpin,
    {
        let coll = self.db.collection::<T>(collection);
        let mut find = coll.find(doc! {}).sort(doc! { "created_at": -1 });
        if limit > 0 {
            find = find.limit(limit);
        }
        let cursor = find
            .await
            .with_context(|| format!("query of {collection} failed"))?;
        Ok(cursor.try_collect().await?)
    }

    async fn purge(&self, collection: &str) -> Result<u64> {
        let result = self
            .db
            .collection::<Document>(collection)
            .delete_many(doc! {})
            .await
            .with_context(|| format!("purge of {collection} failed"))?;
        info!("deleted {} records from {collection}", result.deleted_count);
        Ok(result.deleted_count)
    }

    pub async fn list_arp(&self, limit: i64) -> Result<Vec<ArpHistoryRecord>> {
        self.list(ARP_COLLECTION, limit).await
    }

    pub async fn purge_arp(&self) -> Result<u64> {
        self.purge(ARP_COLLECTION).await
    }

    pub async fn list_icmp(&self, limit: i64) -> Result<Vec<IcmpHistoryRecord>> {
        self.list(ICMP_COLLECTION, limit).await
    }

    pub async fn purge_icmp(&self) -> Result<u64> {
        self.purge(ICMP_COLLECTION).await
    }

    pub async fn list_nmap_port(&self, limit: i64) -> Result<Vec<NmapPortHistoryRecord>> {
        self.list(NMAP_TCP_UDP_COLLECTION, limit).await
    }

    pub async fn purge_nmap_port(&self) -> Result<u64> {
        self.purge(NMAP_TCP_UDP_COLLECTION).await
    }

    pub async fn list_nmap_os(&self, limit: i64) -> Result<Vec<NmapOsHistoryRecord>> {
        self.list(NMAP_OS_COLLECTION, limit).await
    }

    pub async fn purge_nmap_os(&self) -> Result<u64> {
        self.purge(NMAP_OS_COLLECTION).await
    }

    pub async fn list_nmap_host(&self, limit: i64) -> Result<Vec<NmapHostHistoryRecord>> {
        self.list(NMAP_HOST_COLLECTION, limit).await
    }

    pub async fn purge_nmap_host(&self) -> Result<u64> {
        self.purge(NMAP_HOST_COLLECTION).await
    }

    pub async fn save_tcp(&self, mut record: TcpBannerHistoryRecord) -> Result<()> {
        record.created_at = Utc::now();
        self.insert(TCP_COLLECTION, &record).await
    }

    pub async fn list_tcp(&self, limit: i64) -> Result<Vec<TcpBannerHistoryRecord>> {
        self.list(TCP_COLLECTION, limit).await
    }

    pub async fn purge_tcp(&self) -> Result<u64> {
        self.purge(TCP_COLLECTION).await
    }

    /// Everything recorded for one task across all collections, used to
    /// seed late-joining stream subscribers.
    pub async fn find_by_task(&self, task_id: &str) -> Result<Vec<serde_json::Value>> {
        let mut out = Vec::new();
        for collection in [
            ARP_COLLECTION,
            ICMP_COLLECTION,
            NMAP_TCP_UDP_COLLECTION,
            NMAP_OS_COLLECTION,
            NMAP_HOST_COLLECTION,
            TCP_COLLECTION,
        ] {
            let cursor = self
                .db
                .collection::<Document>(collection)
                .find(doc! { "task_id": task_id })
                .await
                .with_context(|| format!("query of {collection} failed"))?;
            let docs: Vec<Document> = cursor.try_collect().await?;
            for d in docs {
                out.push(serde_json::to_value(&d)?);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl HistoryStore for HistoryRepo {
    async fn save_arp(&self, mut record: ArpHistoryRecord) -> Result<()> {
        record.created_at = Utc::now();
        self.insert(ARP_COLLECTION, &record).await
    }

    async fn save_icmp(&self, mut record: IcmpHistoryRecord) -> Result<()> {
        record.created_at = Utc::now();
        self.insert(ICMP_COLLECTION, &record).await
    }

    async fn save_nmap_port(&self, mut record: NmapPortHistoryRecord) -> Result<()> {
        record.created_at = Utc::now();
        self.insert(NMAP_TCP_UDP_COLLECTION, &record).await
    }

    async fn save_nmap_os(&self, mut record: NmapOsHistoryRecord) -> Result<()> {
        record.created_at = Utc::now();
        self.insert(NMAP_OS_COLLECTION, &record).await
    }

    async fn save_nmap_host(&self, mut record: NmapHostHistoryRecord) -> Result<()> {
        record.created_at = Utc::now();
        self.insert(NMAP_HOST_COLLECTION, &record).await
    }
}
