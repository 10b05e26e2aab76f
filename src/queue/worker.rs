//! Worker consume/execute/reply loop.
//!
//! Each worker process binds exactly one durable queue with a prefetch of
//! one and manual acknowledgement. Probe failures travel back inside the
//! reply (`status:"failed"`); only an unusable body is nacked, without
//! requeue. A worker crash loses nothing but its in-flight delivery.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};
use tracing::{error, info, warn};

use super::{connect, declare_queue};
use crate::config::WorkerConfig;

/// One scan family's execution logic.
///
/// `Err` means the body could not be parsed at all; anything the probe
/// itself reports belongs in the serialized reply.
#[async_trait]
pub trait ScanHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> Result<Vec<u8>>;
}

/// Run the consume loop until the broker connection drops.
pub async fn run(cfg: &WorkerConfig, handler: Arc<dyn ScanHandler>) -> Result<()> {
    let conn = connect(&cfg.rabbitmq_url).await?;
    let channel = conn
        .create_channel()
        .await
        .context("failed to open worker channel")?;

    declare_queue(&channel, &cfg.scanner_name).await?;
    channel
        .basic_qos(1, BasicQosOptions::default())
        .await
        .context("failed to set prefetch")?;

    let mut consumer = channel
        .basic_consume(
            &cfg.scanner_name,
            "",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("failed to consume {}", cfg.scanner_name))?;

    info!("worker started, waiting for tasks on {}", cfg.scanner_name);

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(d) => d,
            Err(e) => {
                error!("consume error: {e}");
                break;
            }
        };
        process_delivery(&channel, delivery, handler.as_ref()).await;
    }

    warn!("consumer for {} closed", cfg.scanner_name);
    Ok(())
}

async fn process_delivery(channel: &Channel, delivery: Delivery, handler: &dyn ScanHandler) {
    match handler.handle(&delivery.data).await {
        Ok(reply) => {
            if let Some(reply_to) = delivery.properties.reply_to().as_ref() {
                let correlation = delivery
                    .properties
                    .correlation_id()
                    .clone()
                    .unwrap_or_else(|| "".into());
                let props = BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_correlation_id(correlation);
                let published = channel
                    .basic_publish(
                        "",
                        reply_to.as_str(),
                        BasicPublishOptions::default(),
                        &reply,
                        props,
                    )
                    .await;
                match published {
                    Ok(confirm) => {
                        if let Err(e) = confirm.await {
                            error!("failed to publish reply: {e}");
                        }
                    }
                    Err(e) => error!("failed to publish reply: {e}"),
                }
            }
            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                error!("ack failed: {e}");
            }
        }
        Err(e) => {
            warn!("unusable delivery: {e}");
            let nack = BasicNackOptions {
                requeue: false,
                ..Default::default()
            };
            if let Err(e) = delivery.nack(nack).await {
                error!("nack failed: {e}");
            }
        }
    }
}
