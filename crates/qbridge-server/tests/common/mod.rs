//! Common test utilities for QBridge integration tests using testcontainers
//!
//! Spins up PostgreSQL, MySQL and RabbitMQ containers so the bridge can be
//! tested against real services without any manual setup.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestPostgres, TestRabbitMq};
//!
//! #[tokio::test]
//! async fn test_with_services() {
//!     let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
//!     let mq = TestRabbitMq::start().await.expect("Failed to start RabbitMQ");
//!
//!     // Your test code here
//! }
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use lapin::{
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Connection, ConnectionProperties,
};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::{mysql::Mysql, postgres::Postgres, rabbitmq::RabbitMq};
use tracing::{debug, info};

use qbridge_server::config::{Config, DatabaseConfig};
use qbridge_server::db::DbDriver;

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with a connected pool.
pub struct TestPostgres {
    container: ContainerAsync<Postgres>,
    pool: AnyPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

        debug!("PostgreSQL connection: {}", connection_string);

        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Database settings pointing at this container.
    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.connection_string.clone(),
            driver: DbDriver::Postgres,
            max_connections: 5,
            ..Config::default().database
        }
    }

    /// Create the destination table without constraints, as the bridge
    /// expects it in production.
    pub async fn create_table(&self) -> Result<()> {
        create_table(&self.pool, false).await
    }

    /// Create the destination table with a primary key on `col1`.
    pub async fn create_keyed_table(&self) -> Result<()> {
        create_table(&self.pool, true).await
    }

    /// All rows of the destination table ordered by key.
    pub async fn rows(&self) -> Result<Vec<(i32, String)>> {
        read_rows(&self.pool).await
    }

    /// Poll until the table holds at least `count` rows.
    pub async fn wait_for_rows(&self, count: usize) -> Result<Vec<(i32, String)>> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        loop {
            let rows = self.rows().await?;
            if rows.len() >= count {
                return Ok(rows);
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("timed out waiting for {} rows, have {}", count, rows.len());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

// ============================================================================
// MySQL Test Container
// ============================================================================

/// MySQL container with a connected pool, logged in as `root` on database
/// `test`.
pub struct TestMySql {
    container: ContainerAsync<Mysql>,
    pool: AnyPool,
    connection_string: String,
}

impl TestMySql {
    pub async fn start() -> Result<Self> {
        info!("Starting MySQL test container...");

        let container = Mysql::default()
            .start()
            .await
            .context("Failed to start MySQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(3306.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("mysql://root@{}:{}/test", host, port);

        debug!("MySQL connection: {}", connection_string);

        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to MySQL")?;

        Ok(Self {
            container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.connection_string.clone(),
            driver: DbDriver::MySql,
            max_connections: 5,
            ..Config::default().database
        }
    }

    pub async fn create_table(&self) -> Result<()> {
        create_table(&self.pool, false).await
    }

    pub async fn create_keyed_table(&self) -> Result<()> {
        create_table(&self.pool, true).await
    }

    pub async fn rows(&self) -> Result<Vec<(i32, String)>> {
        read_rows(&self.pool).await
    }

    /// Lower InnoDB's lock wait timeout for connections opened from now on.
    pub async fn set_lock_wait_timeout(&self, secs: u32) -> Result<()> {
        sqlx::query(&format!("SET GLOBAL innodb_lock_wait_timeout = {}", secs))
            .execute(&self.pool)
            .await
            .context("Failed to set innodb_lock_wait_timeout")?;
        Ok(())
    }
}

async fn create_table(pool: &AnyPool, keyed: bool) -> Result<()> {
    let statement = if keyed {
        "CREATE TABLE teste (col1 INTEGER PRIMARY KEY, col2 VARCHAR(255))"
    } else {
        "CREATE TABLE teste (col1 INTEGER, col2 VARCHAR(255))"
    };
    sqlx::query(statement)
        .execute(pool)
        .await
        .context("Failed to create table teste")?;
    Ok(())
}

async fn read_rows(pool: &AnyPool) -> Result<Vec<(i32, String)>> {
    let rows = sqlx::query_as::<_, (i32, String)>("SELECT col1, col2 FROM teste ORDER BY col1, col2")
        .fetch_all(pool)
        .await
        .context("Failed to read table teste")?;
    Ok(rows)
}

// ============================================================================
// RabbitMQ Test Container
// ============================================================================

/// RabbitMQ container plus a publishing connection.
pub struct TestRabbitMq {
    container: ContainerAsync<RabbitMq>,
    url: String,
    connection: Connection,
}

impl TestRabbitMq {
    pub async fn start() -> Result<Self> {
        info!("Starting RabbitMQ test container...");

        let container = RabbitMq::default()
            .start()
            .await
            .context("Failed to start RabbitMQ container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5672.tcp())
            .await
            .context("Failed to get container port")?;

        let url = format!("amqp://guest:guest@{}:{}/%2f", host, port);
        debug!("RabbitMQ connection: {}", url);

        let connection = Connection::connect(&url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        Ok(Self {
            container,
            url,
            connection,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn declare_queue(&self, name: &str) -> Result<()> {
        let channel = self.connection.create_channel().await?;
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
            .context("Failed to declare queue")?;
        Ok(())
    }

    /// Publish each payload to `queue` through the default exchange.
    pub async fn publish(&self, queue: &str, payloads: &[&str]) -> Result<()> {
        let channel = self.connection.create_channel().await?;
        for payload in payloads {
            channel
                .basic_publish(
                    "",
                    queue,
                    BasicPublishOptions::default(),
                    payload.as_bytes(),
                    BasicProperties::default(),
                )
                .await?
                .await
                .context("Publish was not confirmed")?;
        }
        Ok(())
    }

    /// Messages waiting in `queue`, not counting unacknowledged ones.
    pub async fn message_count(&self, queue: &str) -> Result<u32> {
        let channel = self.connection.create_channel().await?;
        let state = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to inspect queue")?;
        Ok(state.message_count())
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Bridge configuration wired to both test containers.
pub fn bridge_config(pg: &TestPostgres, mq: &TestRabbitMq) -> Config {
    let mut config = Config::default();
    config.amqp.url = mq.url().to_string();
    config.database = pg.database_config();
    config.bridge.shutdown_timeout_secs = 5;
    config.bridge.write_timeout_secs = 5;
    config
}

/// Initialize tracing for tests
///
/// Call this at the start of your test to enable logging.
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,qbridge_server=debug,sqlx=warn,lapin=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}
