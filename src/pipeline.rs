//! Result pipeline: reconcile a worker reply with its cached request and
//! persist the composed history record.
//!
//! Runs off the reply consumer's callback, one task per reply, with no
//! ordering across tasks. Insert failures are logged and dropped; the
//! cache entry survives them so a later reply for the same task can
//! re-attempt. Only a successful insert evicts.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::cache::RequestCache;
use crate::history::HistoryStore;
use crate::models::{
    ArpHistoryRecord, ArpReply, IcmpHistoryRecord, IcmpReply, NmapHostHistoryRecord,
    NmapHostReply, NmapOsHistoryRecord, NmapOsReply, NmapPortHistoryRecord, NmapPortReply,
    ScanReply, ScanRequest,
};
use crate::scan::arp::partition_devices;

pub struct ResultPipeline {
    cache: Arc<RequestCache>,
    store: Arc<dyn HistoryStore>,
}

impl ResultPipeline {
    pub fn new(cache: Arc<RequestCache>, store: Arc<dyn HistoryStore>) -> Self {
        Self { cache, store }
    }

    /// Hand a reply off for asynchronous persistence.
    pub fn dispatch(self: &Arc<Self>, reply: ScanReply) {
        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.process(reply).await;
        });
    }

    pub async fn process(&self, reply: ScanReply) {
        match reply {
            ScanReply::Arp(r) => self.save_arp(r).await,
            ScanReply::Icmp(r) => self.save_icmp(r).await,
            ScanReply::NmapPort(r) => self.save_nmap_port(r).await,
            ScanReply::NmapOs(r) => self.save_nmap_os(r).await,
            ScanReply::NmapHost(r) => self.save_nmap_host(r).await,
            // Banner history is written by its worker, which alone holds
            // the raw bytes; synthesized failures have nothing to persist.
            ScanReply::TcpBanner(_) | ScanReply::Generic(_) => {}
        }
    }

    async fn save_arp(&self, reply: ArpReply) {
        let (interface_name, ip_range) = match self.cache.get(&reply.task_id) {
            Some(ScanRequest::Arp(req)) => (req.interface_name, req.ip_range),
            _ => (String::new(), String::new()),
        };

        // Re-derive the partition and counts from the device list; the
        // worker-provided numbers are not trusted.
        let (online_devices, offline_devices) = partition_devices(&reply.devices);

        let record = ArpHistoryRecord {
            id: None,
            task_id: reply.task_id.clone(),
            interface_name,
            ip_range,
            status: reply.status,
            total_count: reply.devices.len(),
            online_count: online_devices.len(),
            offline_count: offline_devices.len(),
            devices: reply.devices,
            online_devices,
            offline_devices,
            error: reply.error,
            created_at: Utc::now(),
        };

        self.finish("ARP", &reply.task_id, self.store.save_arp(record).await)
            .await;
    }

    async fn save_icmp(&self, reply: IcmpReply) {
        let (targets, ping_count) = match self.cache.get(&reply.task_id) {
            Some(ScanRequest::Icmp(req)) => (req.targets, req.ping_count),
            _ => (Vec::new(), 0),
        };

        let record = IcmpHistoryRecord {
            id: None,
            task_id: reply.task_id.clone(),
            targets,
            ping_count,
            status: reply.status,
            results: reply.results,
            error: reply.error,
            created_at: Utc::now(),
        };

        self.finish("ICMP", &reply.task_id, self.store.save_icmp(record).await)
            .await;
    }

    async fn save_nmap_port(&self, reply: NmapPortReply) {
        let (ip, scanner_type, ports) = match self.cache.get(&reply.task_id) {
            Some(ScanRequest::NmapPort(req)) => (req.ip, req.scanner_type, req.ports),
            _ => (String::new(), String::new(), String::new()),
        };

        let record = NmapPortHistoryRecord {
            id: None,
            task_id: reply.task_id.clone(),
            ip,
            scanner_type,
            ports,
            host: reply.host,
            port_info: reply.port_info,
            status: reply.status,
            error: reply.error,
            created_at: Utc::now(),
        };

        self.finish(
            "Nmap TCP/UDP",
            &reply.task_id,
            self.store.save_nmap_port(record).await,
        )
        .await;
    }

    async fn save_nmap_os(&self, reply: NmapOsReply) {
        let ip = match self.cache.get(&reply.task_id) {
            Some(ScanRequest::NmapOs(req)) => req.ip,
            _ => String::new(),
        };

        let record = NmapOsHistoryRecord {
            id: None,
            task_id: reply.task_id.clone(),
            ip,
            host: reply.host,
            name: reply.name,
            accuracy: reply.accuracy,
            vendor: reply.vendor,
            family: reply.family,
            os_type: reply.os_type,
            status: reply.status,
            error: reply.error,
            created_at: Utc::now(),
        };

        self.finish(
            "Nmap OS detection",
            &reply.task_id,
            self.store.save_nmap_os(record).await,
        )
        .await;
    }

    async fn save_nmap_host(&self, reply: NmapHostReply) {
        let ip = match self.cache.get(&reply.task_id) {
            Some(ScanRequest::NmapHost(req)) => req.ip,
            _ => String::new(),
        };

        let record = NmapHostHistoryRecord {
            id: None,
            task_id: reply.task_id.clone(),
            ip,
            host: reply.host,
            host_up: reply.host_up,
            host_total: reply.host_total,
            status: reply.status,
            dns: reply.dns,
            reason: reply.reason,
            error: reply.error,
            created_at: Utc::now(),
        };

        self.finish(
            "Nmap host discovery",
            &reply.task_id,
            self.store.save_nmap_host(record).await,
        )
        .await;
    }

    async fn finish(&self, kind: &str, task_id: &str, result: anyhow::Result<()>) {
        match result {
            Ok(()) => {
                info!("saved {kind} history for task {task_id}");
                self.cache.remove(task_id);
            }
            Err(e) => error!("failed to save {kind} history for task {task_id}: {e}"),
        }
    }
}
