//! Gateway HTTP surface: websocket endpoint plus the history REST API.

pub mod history_api;
pub mod hub;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::SweepConfig;
use crate::history::HistoryRepo;
use crate::router::ScanRouter;
use hub::Hub;

pub struct AppState {
    pub router: ScanRouter,
    pub hub: Arc<Hub>,
    pub history: HistoryRepo,
    pub sweep: SweepConfig,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route(
            "/api/history/arp",
            get(history_api::get_arp_history).delete(history_api::delete_arp_history),
        )
        .route(
            "/api/history/icmp",
            get(history_api::get_icmp_history).delete(history_api::delete_icmp_history),
        )
        .route(
            "/api/history/nmap",
            get(history_api::get_nmap_history).delete(history_api::delete_nmap_history),
        )
        .route(
            "/api/history/tcp",
            get(history_api::get_tcp_history).delete(history_api::delete_tcp_history),
        )
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("gateway listening on {addr}");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
