//! History REST surface.
//!
//! `GET /api/history/{arp|icmp|nmap|tcp}?limit=N` lists newest first,
//! `DELETE` purges. The nmap endpoint fans out across its three
//! sub-collections, selected by `?type=`. An unparseable `limit` falls
//! back to "no limit" rather than erroring.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::AppState;
use crate::models::HistoryResponse;

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    pub limit: Option<String>,
    #[serde(rename = "type")]
    pub scan_type: Option<String>,
}

impl HistoryQuery {
    fn limit(&self) -> i64 {
        self.limit
            .as_deref()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(0)
    }

    fn scan_type(&self) -> &str {
        self.scan_type.as_deref().unwrap_or("all")
    }
}

type ApiResult = (StatusCode, Json<HistoryResponse>);

fn ok(data: serde_json::Value, count: Option<usize>) -> ApiResult {
    (StatusCode::OK, Json(HistoryResponse::ok(data, count)))
}

fn internal(message: &str) -> ApiResult {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(HistoryResponse::err(message)),
    )
}

pub async fn get_arp_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    match state.history.list_arp(query.limit()).await {
        Ok(records) => {
            let count = records.len();
            ok(json!(records), Some(count))
        }
        Err(e) => {
            error!("failed to list ARP history: {e}");
            internal("Failed to retrieve ARP history")
        }
    }
}

pub async fn delete_arp_history(State(state): State<Arc<AppState>>) -> ApiResult {
    match state.history.purge_arp().await {
        Ok(_) => ok(json!("ARP history deleted successfully"), None),
        Err(e) => {
            error!("failed to purge ARP history: {e}");
            internal("Failed to delete ARP history")
        }
    }
}

pub async fn get_icmp_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    match state.history.list_icmp(query.limit()).await {
        Ok(records) => {
            let count = records.len();
            ok(json!(records), Some(count))
        }
        Err(e) => {
            error!("failed to list ICMP history: {e}");
            internal("Failed to retrieve ICMP history")
        }
    }
}

pub async fn delete_icmp_history(State(state): State<Arc<AppState>>) -> ApiResult {
    match state.history.purge_icmp().await {
        Ok(_) => ok(json!("ICMP history deleted successfully"), None),
        Err(e) => {
            error!("failed to purge ICMP history: {e}");
            internal("Failed to delete ICMP history")
        }
    }
}

pub async fn get_nmap_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    let limit = query.limit();
    let scan_type = query.scan_type();
    let mut result = serde_json::Map::new();

    if matches!(scan_type, "all" | "tcp_udp") {
        match state.history.list_nmap_port(limit).await {
            Ok(records) => {
                result.insert("tcp_udp".into(), json!(records));
            }
            Err(e) => error!("failed to list Nmap TCP/UDP history: {e}"),
        }
    }
    if matches!(scan_type, "all" | "os_detection") {
        match state.history.list_nmap_os(limit).await {
            Ok(records) => {
                result.insert("os_detection".into(), json!(records));
            }
            Err(e) => error!("failed to list Nmap OS detection history: {e}"),
        }
    }
    if matches!(scan_type, "all" | "host_discovery") {
        match state.history.list_nmap_host(limit).await {
            Ok(records) => {
                result.insert("host_discovery".into(), json!(records));
            }
            Err(e) => error!("failed to list Nmap host discovery history: {e}"),
        }
    }

    ok(serde_json::Value::Object(result), None)
}

pub async fn delete_nmap_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    let scan_type = query.scan_type();
    let mut result = serde_json::Map::new();

    if matches!(scan_type, "all" | "tcp_udp") {
        let outcome = match state.history.purge_nmap_port().await {
            Ok(_) => "Deleted successfully",
            Err(e) => {
                error!("failed to purge Nmap TCP/UDP history: {e}");
                "Failed to delete TCP/UDP history"
            }
        };
        result.insert("tcp_udp".into(), json!(outcome));
    }
    if matches!(scan_type, "all" | "os_detection") {
        let outcome = match state.history.purge_nmap_os().await {
            Ok(_) => "Deleted successfully",
            Err(e) => {
                error!("failed to purge Nmap OS detection history: {e}");
                "Failed to delete OS Detection history"
            }
        };
        result.insert("os_detection".into(), json!(outcome));
    }
    if matches!(scan_type, "all" | "host_discovery") {
        let outcome = match state.history.purge_nmap_host().await {
            Ok(_) => "Deleted successfully",
            Err(e) => {
                error!("failed to purge Nmap host discovery history: {e}");
                "Failed to delete Host Discovery history"
            }
        };
        result.insert("host_discovery".into(), json!(outcome));
    }

    ok(serde_json::Value::Object(result), None)
}

pub async fn get_tcp_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    match state.history.list_tcp(query.limit()).await {
        Ok(records) => {
            let count = records.len();
            ok(json!(records), Some(count))
        }
        Err(e) => {
            error!("failed to list TCP history: {e}");
            internal("Failed to retrieve TCP history")
        }
    }
}

pub async fn delete_tcp_history(State(state): State<Arc<AppState>>) -> ApiResult {
    match state.history.purge_tcp().await {
        Ok(_) => ok(json!("TCP history deleted successfully"), None),
        Err(e) => {
            error!("failed to purge TCP history: {e}");
            internal("Failed to delete TCP history")
        }
    }
}
