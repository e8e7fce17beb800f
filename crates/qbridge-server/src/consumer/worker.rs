//! A single consumer worker
//!
//! Each worker owns one [`MessageSource`] and handles its deliveries strictly
//! one at a time: receive, parse, write, settle. Shutdown is only observed
//! while the worker is waiting for the next delivery, so a message that has
//! been received is always carried through to its settlement.

use qbridge_common::DeliveryOutcome;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::handle_payload;
use super::stats::PoolStats;
use crate::db::writer::RecordSink;
use crate::queue::{MessageSource, RawMessage};

/// What a worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a delivery.
    Idle,
    /// Parsing and writing a delivery.
    Processing,
    Acking,
    Rejecting,
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Acking => "acking",
            Self::Rejecting => "rejecting",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub(super) struct Worker {
    pub(super) id: usize,
    pub(super) source: Box<dyn MessageSource>,
    pub(super) sink: Arc<dyn RecordSink>,
    pub(super) shutdown: CancellationToken,
    pub(super) stats: Arc<PoolStats>,
    pub(super) state: Arc<watch::Sender<WorkerState>>,
}

impl Worker {
    pub(super) async fn run(mut self) {
        info!(worker_id = self.id, "Worker started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!(worker_id = self.id, "Shutdown requested");
                    break;
                }
                next = self.source.next_message() => next,
            };

            match next {
                Some(Ok(message)) => self.process(message).await,
                Some(Err(e)) => {
                    warn!(worker_id = self.id, error = %e, "Failed to receive delivery");
                },
                None => {
                    warn!(worker_id = self.id, "Delivery stream ended");
                    break;
                },
            }
        }

        self.state.send_replace(WorkerState::Stopped);
        info!(worker_id = self.id, "Worker stopped");
    }

    #[instrument(
        skip_all,
        fields(
            worker_id = self.id,
            delivery_tag = message.delivery_tag,
            redelivered = message.redelivered
        )
    )]
    async fn process(&mut self, message: RawMessage) {
        self.state.send_replace(WorkerState::Processing);
        self.stats.record_received();

        let outcome = handle_payload(self.sink.as_ref(), &message.body).await;

        self.state.send_replace(match outcome {
            DeliveryOutcome::Acknowledged => WorkerState::Acking,
            _ => WorkerState::Rejecting,
        });

        match message.settle(&outcome).await {
            Ok(()) => {
                self.stats.record_settled(&outcome);
                debug!(outcome = %outcome, "Delivery settled");
            },
            Err(e) => {
                // The broker redelivers whatever it did not hear back about.
                self.stats.record_settle_failure();
                error!(outcome = %outcome, error = %e, "Failed to settle delivery");
            },
        }

        self.state.send_replace(WorkerState::Idle);
    }
}
