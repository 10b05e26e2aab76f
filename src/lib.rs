pub mod cache;
pub mod config;
pub mod error;
pub mod history;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod router;
pub mod scan;
pub mod server;

/// Shared tracing setup for the gateway and every worker binary.
pub fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
