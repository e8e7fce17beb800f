//! Queue ingress
//!
//! The consumer pool only sees the traits in this module. [`amqp`] implements
//! them on a RabbitMQ connection; tests use an in-memory queue.

pub mod amqp;
#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use qbridge_common::DeliveryOutcome;
use thiserror::Error;

pub use amqp::AmqpConnection;

/// Result type alias for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Queue '{queue}' is not available: {reason}")]
    QueueUnavailable { queue: String, reason: String },

    #[error("Queue connection closed")]
    Closed,
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> QueueResult<()>;

    /// Reject the delivery; `requeue` hands it back to the broker for redelivery.
    async fn reject(&self, requeue: bool) -> QueueResult<()>;
}

/// One delivery, owned by the worker that received it until it is settled.
pub struct RawMessage {
    pub body: Vec<u8>,
    /// Broker-assigned identifier, unique per channel.
    pub delivery_tag: u64,
    /// Set by the broker when this message was offered before.
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl RawMessage {
    pub fn new(
        body: Vec<u8>,
        delivery_tag: u64,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            body,
            delivery_tag,
            redelivered,
            acker,
        }
    }

    /// Tell the broker what became of this message. Consumes the message.
    pub async fn settle(self, outcome: &DeliveryOutcome) -> QueueResult<()> {
        match outcome {
            DeliveryOutcome::Acknowledged => self.acker.ack().await,
            DeliveryOutcome::Rejected { .. } => self.acker.reject(false).await,
            DeliveryOutcome::Requeued { .. } => self.acker.reject(true).await,
        }
    }
}

impl std::fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawMessage")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("len", &self.body.len())
            .finish()
    }
}

/// A worker's private stream of deliveries.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next delivery. `None` means the stream is over for good.
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses no
    /// message.
    async fn next_message(&mut self) -> Option<QueueResult<RawMessage>>;
}

/// The process-wide broker connection shared by all workers.
#[async_trait]
pub trait QueueConnection: Send + Sync {
    /// Open the delivery stream for one worker.
    async fn open_source(&self, worker_id: usize) -> QueueResult<Box<dyn MessageSource>>;

    /// Close the connection. Unsettled deliveries return to the queue.
    async fn close(&self) -> QueueResult<()>;
}
