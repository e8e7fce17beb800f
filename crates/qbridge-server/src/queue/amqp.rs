//! RabbitMQ implementation of the queue traits
//!
//! One AMQP connection per process; each worker gets its own channel with a
//! prefetch limit and a manual-ack consumer, so an unsettled message goes
//! back to the queue when its channel or the connection closes.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties, Consumer,
};
use tracing::{debug, info, warn};

use super::{
    Acknowledger, MessageSource, QueueConnection, QueueError, QueueResult, RawMessage,
};
use crate::config::{redact_url, AmqpConfig};
use crate::error::BridgeResult;

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

pub struct AmqpConnection {
    connection: Connection,
    queue_name: String,
    config: AmqpConfig,
}

impl AmqpConnection {
    /// Connect to the broker and make sure `queue_name` can be consumed.
    ///
    /// With `declare_queue` the queue is declared durable; otherwise it is
    /// checked passively and a missing queue fails the connect. The
    /// connection is closed again on any failure after it was opened.
    pub async fn connect(config: &AmqpConfig, queue_name: &str) -> BridgeResult<Self> {
        let url = config.connection_url()?;

        let connection = Connection::connect(&url, ConnectionProperties::default())
            .await
            .map_err(QueueError::from)?;

        info!(url = %redact_url(&url), "Connected to AMQP broker");

        let this = Self {
            connection,
            queue_name: queue_name.to_string(),
            config: config.clone(),
        };

        if let Err(e) = this.ensure_queue().await {
            if let Err(close_err) = this.close().await {
                debug!(error = %close_err, "Failed to close AMQP connection after startup error");
            }
            return Err(e.into());
        }

        Ok(this)
    }

    async fn ensure_queue(&self) -> QueueResult<()> {
        let channel = self.connection.create_channel().await?;

        let options = QueueDeclareOptions {
            passive: !self.config.declare_queue,
            durable: true,
            ..Default::default()
        };

        let queue = channel
            .queue_declare(&self.queue_name, options, FieldTable::default())
            .await
            .map_err(|e| QueueError::QueueUnavailable {
                queue: self.queue_name.clone(),
                reason: e.to_string(),
            })?;

        info!(
            queue = %self.queue_name,
            declared = self.config.declare_queue,
            messages = queue.message_count(),
            consumers = queue.consumer_count(),
            "Queue ready"
        );

        if let Err(e) = channel.close(REPLY_SUCCESS, "queue check done").await {
            debug!(error = %e, "Failed to close queue check channel");
        }

        Ok(())
    }
}

#[async_trait]
impl QueueConnection for AmqpConnection {
    async fn open_source(&self, worker_id: usize) -> QueueResult<Box<dyn MessageSource>> {
        let channel = self.connection.create_channel().await?;

        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await?;

        let consumer_tag = self.config.consumer_tag(worker_id);
        let consumer = channel
            .basic_consume(
                &self.queue_name,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(
            worker_id,
            queue = %self.queue_name,
            consumer_tag = %consumer_tag,
            prefetch = self.config.prefetch_count,
            "Consumer registered"
        );

        Ok(Box::new(AmqpSource {
            _channel: channel,
            consumer,
        }))
    }

    async fn close(&self) -> QueueResult<()> {
        if !self.connection.status().connected() {
            warn!("AMQP connection already closed");
            return Ok(());
        }

        self.connection
            .close(REPLY_SUCCESS, "qbridge shutting down")
            .await?;

        info!("AMQP connection closed");
        Ok(())
    }
}

/// Deliveries for one worker: its channel and the consumer on it.
struct AmqpSource {
    // Held so the channel lives exactly as long as the worker's consumer.
    _channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl MessageSource for AmqpSource {
    async fn next_message(&mut self) -> Option<QueueResult<RawMessage>> {
        let delivery = self.consumer.next().await?;

        Some(
            delivery
                .map(|delivery| {
                    RawMessage::new(
                        delivery.data,
                        delivery.delivery_tag,
                        delivery.redelivered,
                        Box::new(LapinAcker(delivery.acker)),
                    )
                })
                .map_err(QueueError::from),
        )
    }
}

struct LapinAcker(Acker);

#[async_trait]
impl Acknowledger for LapinAcker {
    async fn ack(&self) -> QueueResult<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(QueueError::from)
    }

    async fn reject(&self, requeue: bool) -> QueueResult<()> {
        self.0
            .reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(QueueError::from)
    }
}
