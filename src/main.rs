//! Gateway binary: accepts scan requests over websockets, dispatches
//! them to the scan workers through the broker and serves the history
//! REST API.

use std::sync::Arc;

use anyhow::Result;

use scanhive::cache::RequestCache;
use scanhive::config::GatewayConfig;
use scanhive::history::HistoryRepo;
use scanhive::pipeline::ResultPipeline;
use scanhive::queue::rpc::{RpcClient, DEFAULT_RPC_TIMEOUT};
use scanhive::router::ScanRouter;
use scanhive::server::hub::Hub;
use scanhive::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    scanhive::init_tracing();
    let cfg = GatewayConfig::from_env();

    let history = HistoryRepo::connect(&cfg.mongo).await?;
    let rpc = RpcClient::connect(&cfg.rabbitmq_url, DEFAULT_RPC_TIMEOUT).await?;
    let cache = Arc::new(RequestCache::new());
    let pipeline = Arc::new(ResultPipeline::new(
        cache.clone(),
        Arc::new(history.clone()),
    ));
    let hub = Arc::new(Hub::new());

    // Every demultiplexed reply is persisted and fanned out to stream
    // subscribers, independent of the waiter that triggered the call.
    {
        let pipeline = pipeline.clone();
        let hub = hub.clone();
        rpc.set_reply_callback(Arc::new(move |reply| {
            let task_id = reply.task_id().to_string();
            pipeline.dispatch(reply.clone());
            let frame = serde_json::json!({"type": "response", "response": reply});
            let hub = hub.clone();
            tokio::spawn(async move {
                hub.broadcast_to_task(&task_id, frame).await;
            });
        }));
    }

    let state = Arc::new(AppState {
        router: ScanRouter::new(rpc, cache),
        hub,
        history,
        sweep: cfg.sweep.clone(),
    });

    server::serve(state, cfg.server_port).await
}
