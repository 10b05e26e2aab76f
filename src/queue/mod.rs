//! RabbitMQ plumbing shared by the gateway and the workers.
//!
//! Every scan family owns one durable point-to-point queue; RPC is
//! expressed with `reply_to` + `correlation_id` and the broker's direct
//! reply pseudo-queue on the caller side.

pub mod rpc;
pub mod worker;

use anyhow::{Context, Result};
use lapin::options::QueueDeclareOptions;
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tracing::info;

/// Stable queue names, one per scan family.
pub const ARP_QUEUE: &str = "arp_service";
pub const ICMP_QUEUE: &str = "icmp_service";
pub const NMAP_QUEUE: &str = "nmap_service";
pub const TCP_QUEUE: &str = "tcp_service";

/// RabbitMQ's direct reply pseudo-queue.
pub const DIRECT_REPLY_QUEUE: &str = "amq.rabbitmq.reply-to";

pub async fn connect(url: &str) -> Result<Connection> {
    let conn = Connection::connect(url, ConnectionProperties::default())
        .await
        .with_context(|| format!("failed to connect to RabbitMQ at {url}"))?;
    info!("connected to RabbitMQ");
    Ok(conn)
}

/// Declare a durable service queue on `channel`.
pub async fn declare_queue(channel: &Channel, name: &str) -> Result<()> {
    channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("failed to declare queue {name}"))?;
    Ok(())
}
