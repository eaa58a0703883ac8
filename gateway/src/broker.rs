//! The single process-wide AMQP connection.
//!
//! Requests are published to the configured exchange. Replies come back on
//! one exclusive callback queue and are dispatched to the waiting requests by
//! correlation id.

use crate::bridge::PendingReplies;
use crate::config::BrokerConfig;
use crate::metrics_defs::BRIDGE_UNMATCHED_REPLIES;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use hyper::body::Bytes;
use lapin::message::Delivery;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use shared::admin_service::ReadinessCheck;
use shared::counter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const CONTENT_TYPE: &str = "application/json";
const CONTENT_ENCODING: &str = "utf-8";
const CONSUMER_TAG: &str = "forecast-gateway";

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),
    #[error("broker did not confirm the message")]
    Nacked,
}

/// Publishes forecast requests for the calculation module.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, body: Vec<u8>, correlation_id: &str) -> Result<(), PublishError>;
}

pub struct BusClient {
    connection: Connection,
    channel: Channel,
    exchange: String,
    routing_key: String,
    callback_queue: String,
    ready: Arc<AtomicBool>,
}

impl BusClient {
    /// Connects, declares the topology and starts dispatching replies to
    /// `pending`.
    pub async fn connect(
        config: &BrokerConfig,
        pending: Arc<PendingReplies>,
    ) -> Result<Self, lapin::Error> {
        let connection =
            Connection::connect(config.url.as_str(), ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        // Server named, removed by the broker once this connection is gone.
        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        let callback_queue = queue.name().as_str().to_string();

        // Replies may be sent through the exchange or straight to the queue.
        channel
            .queue_bind(
                &callback_queue,
                &config.exchange,
                &callback_queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let consumer = channel
            .basic_consume(
                &callback_queue,
                CONSUMER_TAG,
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        let ready = Arc::new(AtomicBool::new(true));
        tokio::spawn(dispatch_replies(
            consumer.map(|delivery| delivery.map(InboundReply::from)),
            pending,
            ready.clone(),
        ));

        tracing::info!(
            exchange = %config.exchange,
            routing_key = %config.routing_key,
            callback_queue = %callback_queue,
            "Connected to message broker"
        );

        Ok(BusClient {
            connection,
            channel,
            exchange: config.exchange.clone(),
            routing_key: config.routing_key.clone(),
            callback_queue,
            ready,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed) && self.connection.status().connected()
    }

    pub async fn shutdown(&self) -> Result<(), lapin::Error> {
        self.ready.store(false, Ordering::Relaxed);
        self.channel.close(200, "shutting down").await?;
        self.connection.close(200, "shutting down").await?;
        tracing::info!("Closed message broker connection");
        Ok(())
    }
}

impl ReadinessCheck for BusClient {
    fn is_ready(&self) -> bool {
        BusClient::is_ready(self)
    }
}

#[async_trait]
impl Publisher for BusClient {
    async fn publish(&self, body: Vec<u8>, correlation_id: &str) -> Result<(), PublishError> {
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(CONTENT_TYPE))
            .with_content_encoding(ShortString::from(CONTENT_ENCODING))
            .with_correlation_id(ShortString::from(correlation_id))
            .with_reply_to(ShortString::from(self.callback_queue.as_str()));

        let confirmation = self
            .channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(PublishError::Nacked);
        }
        Ok(())
    }
}

/// The parts of a delivery on the callback queue the dispatcher needs.
struct InboundReply {
    correlation_id: Option<String>,
    data: Vec<u8>,
}

impl From<Delivery> for InboundReply {
    fn from(delivery: Delivery) -> Self {
        InboundReply {
            correlation_id: delivery
                .properties
                .correlation_id()
                .as_ref()
                .map(|id| id.as_str().to_string()),
            data: delivery.data,
        }
    }
}

/// Routes replies until the stream ends, then marks the client not ready.
async fn dispatch_replies<S>(mut replies: S, pending: Arc<PendingReplies>, ready: Arc<AtomicBool>)
where
    S: Stream<Item = Result<InboundReply, lapin::Error>> + Unpin,
{
    while let Some(reply) = replies.next().await {
        match reply {
            Ok(reply) => {
                route_reply(&pending, reply.correlation_id.as_deref(), reply.data);
            }
            Err(e) => {
                tracing::error!(error = %e, "Reply consumer failed");
                break;
            }
        }
    }

    ready.store(false, Ordering::Relaxed);
    tracing::warn!("Reply consumer stopped, waiting requests will time out");
}

/// Hands one reply to its waiting request. Returns whether it was taken.
fn route_reply(pending: &PendingReplies, correlation_id: Option<&str>, data: Vec<u8>) -> bool {
    let Some(correlation_id) = correlation_id else {
        counter!(BRIDGE_UNMATCHED_REPLIES).increment(1);
        tracing::warn!("Dropping reply without correlation id");
        return false;
    };

    if pending.deliver(correlation_id, Bytes::from(data)) {
        tracing::debug!(correlation_id, "Reply dispatched");
        true
    } else {
        // Most likely the request already timed out.
        counter!(BRIDGE_UNMATCHED_REPLIES).increment(1);
        tracing::warn!(correlation_id, "Dropping reply nobody is waiting for");
        false
    }
}
