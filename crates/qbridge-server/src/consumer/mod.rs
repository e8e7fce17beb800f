//! Consumer Pool
//!
//! A fixed number of workers pull deliveries from the queue concurrently.
//! Each delivery is parsed, written, and then settled with the broker
//! according to the result:
//!
//! | Result                      | Settlement            |
//! |-----------------------------|-----------------------|
//! | written                     | ack                   |
//! | payload does not parse      | reject, discard       |
//! | permanent write failure     | reject, discard       |
//! | transient write failure     | reject, requeue       |

pub mod stats;
pub mod worker;

use qbridge_common::{payload, DeliveryOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::db::writer::{RecordSink, WriteError};
use crate::queue::{QueueConnection, QueueResult};

pub use stats::{PoolStats, StatsSnapshot};
pub use worker::WorkerState;
use worker::Worker;

/// Decide what happens to one payload. Never fails; every error becomes an
/// outcome.
pub async fn handle_payload(sink: &dyn RecordSink, body: &[u8]) -> DeliveryOutcome {
    let record = match payload::parse(body) {
        Ok(record) => record,
        Err(e) => {
            warn!(error = %e, len = body.len(), "Discarding malformed payload");
            return DeliveryOutcome::rejected(e.to_string());
        },
    };

    match sink.write(&record).await {
        Ok(()) => {
            debug!(key = record.key, "Record written");
            DeliveryOutcome::Acknowledged
        },
        Err(WriteError::Transient(reason)) => {
            warn!(key = record.key, error = %reason, "Write failed, requeueing");
            DeliveryOutcome::requeued(reason)
        },
        Err(WriteError::Permanent(reason)) => {
            error!(key = record.key, error = %reason, "Write failed permanently, discarding");
            DeliveryOutcome::rejected(reason)
        },
    }
}

/// Running set of workers.
pub struct ConsumerPool {
    shutdown: CancellationToken,
    tracker: TaskTracker,
    handles: Vec<JoinHandle<()>>,
    states: Vec<Arc<watch::Sender<WorkerState>>>,
    stats: Arc<PoolStats>,
}

impl ConsumerPool {
    /// Open one delivery stream per worker and start the workers.
    ///
    /// Either all `pool_size` workers start or none do.
    pub async fn start(
        queue: Arc<dyn QueueConnection>,
        sink: Arc<dyn RecordSink>,
        pool_size: usize,
    ) -> QueueResult<Self> {
        let mut sources = Vec::with_capacity(pool_size);
        for worker_id in 0..pool_size {
            sources.push(queue.open_source(worker_id).await?);
        }

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let stats = Arc::new(PoolStats::default());
        let mut handles = Vec::with_capacity(pool_size);
        let mut states = Vec::with_capacity(pool_size);

        for (id, source) in sources.into_iter().enumerate() {
            let (state, _) = watch::channel(WorkerState::Idle);
            let state = Arc::new(state);

            let worker = Worker {
                id,
                source,
                sink: Arc::clone(&sink),
                shutdown: shutdown.clone(),
                stats: Arc::clone(&stats),
                state: Arc::clone(&state),
            };

            handles.push(tracker.spawn(worker.run()));
            states.push(state);
        }
        tracker.close();

        info!(pool_size, "Consumer pool started");

        Ok(Self {
            shutdown,
            tracker,
            handles,
            states,
            stats,
        })
    }

    pub fn size(&self) -> usize {
        self.states.len()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.states.iter().map(|state| *state.borrow()).collect()
    }

    /// Watch one worker's state changes.
    pub fn subscribe(&self, worker_id: usize) -> Option<watch::Receiver<WorkerState>> {
        self.states.get(worker_id).map(|state| state.subscribe())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Resolves once every worker has exited, for whatever reason.
    pub async fn wait_stopped(&self) {
        self.tracker.wait().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Stop accepting deliveries and wait up to `timeout` for in-flight ones
    /// to settle. Workers still busy after that are aborted and their
    /// deliveries stay unsettled.
    pub async fn shutdown(self, timeout: Duration) -> StatsSnapshot {
        info!(timeout_secs = timeout.as_secs(), "Stopping consumer pool");
        self.shutdown.cancel();

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            let unfinished = self.handles.iter().filter(|h| !h.is_finished()).count();
            warn!(unfinished, "Workers did not finish in time, aborting them");

            for handle in &self.handles {
                handle.abort();
            }
            self.tracker.wait().await;

            for state in &self.states {
                state.send_replace(WorkerState::Stopped);
            }
        }

        let snapshot = self.stats.snapshot();
        info!(
            received = snapshot.received,
            acknowledged = snapshot.acknowledged,
            rejected = snapshot.rejected,
            requeued = snapshot.requeued,
            settle_failures = snapshot.settle_failures,
            "Consumer pool stopped"
        );
        snapshot
    }
}
