//! Bridge Service
//!
//! Owns the bridge's resources for their whole lifetime:
//!
//! ```text
//! Created -> Starting -> Running -> Stopping -> Stopped
//!               |                                  ^
//!               +---------- startup failure -------+
//! ```
//!
//! Resources are acquired in order (broker connection, database pool,
//! workers) and released in reverse. A failure part way through startup
//! releases whatever was already acquired.

use sqlx::AnyPool;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::consumer::{ConsumerPool, StatsSnapshot, WorkerState};
use crate::db::{self, writer::InsertWriter, writer::RecordSink};
use crate::error::{BridgeError, BridgeResult};
use crate::queue::{AmqpConnection, QueueConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything held while the service runs.
struct Resources {
    queue: Arc<dyn QueueConnection>,
    database: Option<AnyPool>,
    consumers: ConsumerPool,
}

pub struct BridgeService {
    config: Config,
    state: ServiceState,
    resources: Option<Resources>,
}

impl BridgeService {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: ServiceState::Created,
            resources: None,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Connect to the broker and the database, then start the workers.
    pub async fn start(&mut self) -> BridgeResult<()> {
        self.begin_start()?;

        let queue_name = self.config.bridge.queue_name.clone();
        let queue = match AmqpConnection::connect(&self.config.amqp, &queue_name).await {
            Ok(queue) => Arc::new(queue),
            Err(e) => return Err(self.fail_start(e)),
        };

        let database = match db::create_pool(&self.config.database).await {
            Ok(pool) => pool,
            Err(e) => {
                release(queue.as_ref(), None).await;
                return Err(self.fail_start(e));
            },
        };

        let writer = InsertWriter::new(
            database.clone(),
            self.config.database.driver,
            self.config.bridge.write_timeout(),
        );

        self.launch(queue, Arc::new(writer), Some(database)).await
    }

    /// Start the workers on an already acquired queue and sink.
    ///
    /// The service takes over closing `queue`; the sink's own resources stay
    /// with the caller.
    pub async fn start_with(
        &mut self,
        queue: Arc<dyn QueueConnection>,
        sink: Arc<dyn RecordSink>,
    ) -> BridgeResult<()> {
        self.begin_start()?;
        self.launch(queue, sink, None).await
    }

    async fn launch(
        &mut self,
        queue: Arc<dyn QueueConnection>,
        sink: Arc<dyn RecordSink>,
        database: Option<AnyPool>,
    ) -> BridgeResult<()> {
        let pool_size = self.config.bridge.pool_size;

        match ConsumerPool::start(Arc::clone(&queue), sink, pool_size).await {
            Ok(consumers) => {
                self.resources = Some(Resources {
                    queue,
                    database,
                    consumers,
                });
                self.state = ServiceState::Running;
                info!(
                    queue = %self.config.bridge.queue_name,
                    pool_size,
                    "Bridge running"
                );
                Ok(())
            },
            Err(e) => {
                release(queue.as_ref(), database).await;
                Err(self.fail_start(e.into()))
            },
        }
    }

    fn begin_start(&mut self) -> BridgeResult<()> {
        if self.state != ServiceState::Created {
            return Err(BridgeError::invalid_state("start", self.state));
        }
        self.state = ServiceState::Starting;
        info!(queue = %self.config.bridge.queue_name, "Starting bridge");
        Ok(())
    }

    fn fail_start(&mut self, err: BridgeError) -> BridgeError {
        error!(error = %err, "Bridge failed to start");
        self.state = ServiceState::Stopped;
        err
    }

    /// Stop the workers, then close the broker connection and the database
    /// pool.
    ///
    /// Waits up to the configured shutdown timeout for in-flight deliveries.
    /// Anything still unsettled after that is returned to the queue by the
    /// broker once the connection closes.
    pub async fn stop(&mut self) -> BridgeResult<StatsSnapshot> {
        if self.state != ServiceState::Running {
            return Err(BridgeError::invalid_state("stop", self.state));
        }
        let resources = self
            .resources
            .take()
            .ok_or_else(|| BridgeError::invalid_state("stop", self.state))?;

        self.state = ServiceState::Stopping;
        info!("Stopping bridge");

        let stats = resources
            .consumers
            .shutdown(self.config.bridge.shutdown_timeout())
            .await;
        release(resources.queue.as_ref(), resources.database).await;

        self.state = ServiceState::Stopped;
        info!("Bridge stopped");
        Ok(stats)
    }

    /// Resolves when every worker has exited. Only meaningful while running;
    /// returns immediately otherwise.
    pub async fn wait_workers_stopped(&self) {
        if let Some(resources) = &self.resources {
            resources.consumers.wait_stopped().await;
        }
    }

    pub fn stats(&self) -> Option<StatsSnapshot> {
        self.resources.as_ref().map(|r| r.consumers.stats())
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.resources
            .as_ref()
            .map(|r| r.consumers.worker_states())
            .unwrap_or_default()
    }
}

async fn release(queue: &dyn QueueConnection, database: Option<AnyPool>) {
    if let Err(e) = queue.close().await {
        warn!(error = %e, "Failed to close queue connection");
    }
    if let Some(pool) = database {
        pool.close().await;
        info!("Database pool closed");
    }
}
