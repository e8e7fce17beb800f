//! Configuration management
//!
//! Every option comes from the environment (optionally seeded from a `.env`
//! file). Unset keys fall back to the defaults below; set keys that fail to
//! parse are errors.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::db::DbDriver;
use crate::error::{BridgeError, BridgeResult};

// ============================================================================
// Bridge Configuration Constants
// ============================================================================

/// Default queue to consume from.
pub const DEFAULT_QUEUE_NAME: &str = "teste";

/// Default number of concurrent consumer workers.
pub const DEFAULT_POOL_SIZE: usize = 2;

/// Default time a single insert may take before it is abandoned.
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 30;

/// Default time stop() waits for in-flight messages.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// AMQP Configuration Constants
// ============================================================================

/// Default broker URI (local RabbitMQ, default vhost).
pub const DEFAULT_AMQP_URL: &str = "amqp://127.0.0.1:5672/%2f";

/// Default per-channel prefetch; one unacknowledged message per worker.
pub const DEFAULT_AMQP_PREFETCH: u16 = 1;

/// Default consumer tag prefix.
pub const DEFAULT_CONSUMER_TAG: &str = "qbridge";

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/qbridge";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub amqp: AmqpConfig,
    pub database: DatabaseConfig,
}

/// Consumer pool and lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub queue_name: String,
    pub pool_size: usize,
    pub write_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmqpConfig {
    pub url: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub prefetch_count: u16,
    pub consumer_tag_prefix: String,
    /// Declare the queue (durable) instead of only checking that it exists.
    pub declare_queue: bool,
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub driver: DbDriver,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Session time zone set on every new connection.
    pub session_timezone: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `.env`, the environment, and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Read configuration from the process environment without validating it
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env_string("DATABASE_URL", DEFAULT_DATABASE_URL);
        let driver = match std::env::var("DATABASE_DRIVER") {
            Ok(name) => name.parse::<DbDriver>()?,
            Err(_) => DbDriver::from_url(&database_url).ok_or_else(|| {
                anyhow::anyhow!(
                    "Cannot infer database driver from URL scheme; set DATABASE_DRIVER"
                )
            })?,
        };

        Ok(Config {
            bridge: BridgeConfig {
                queue_name: env_string("QBRIDGE_QUEUE_NAME", DEFAULT_QUEUE_NAME),
                pool_size: env_parse("QBRIDGE_POOL_SIZE", DEFAULT_POOL_SIZE)?,
                write_timeout_secs: env_parse("QBRIDGE_WRITE_TIMEOUT", DEFAULT_WRITE_TIMEOUT_SECS)?,
                shutdown_timeout_secs: env_parse(
                    "QBRIDGE_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                )?,
            },
            amqp: AmqpConfig {
                url: env_string("AMQP_URL", DEFAULT_AMQP_URL),
                username: std::env::var("AMQP_USERNAME").ok(),
                password: std::env::var("AMQP_PASSWORD").ok(),
                prefetch_count: env_parse("AMQP_PREFETCH", DEFAULT_AMQP_PREFETCH)?,
                consumer_tag_prefix: env_string("AMQP_CONSUMER_TAG", DEFAULT_CONSUMER_TAG),
                declare_queue: env_parse("AMQP_DECLARE_QUEUE", false)?,
            },
            database: DatabaseConfig {
                url: database_url,
                driver,
                username: std::env::var("DATABASE_USERNAME").ok(),
                password: std::env::var("DATABASE_PASSWORD").ok(),
                session_timezone: std::env::var("DATABASE_TIMEZONE")
                    .ok()
                    .filter(|tz| !tz.trim().is_empty()),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                min_connections: env_parse(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                )?,
                connect_timeout_secs: env_parse(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
                idle_timeout_secs: env_parse(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                )?,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bridge.queue_name.trim().is_empty() {
            anyhow::bail!("Queue name cannot be empty");
        }

        if self.bridge.pool_size == 0 {
            anyhow::bail!("Pool size must be greater than 0");
        }

        if self.bridge.write_timeout_secs == 0 {
            anyhow::bail!("Write timeout must be greater than 0");
        }

        if self.amqp.prefetch_count == 0 {
            anyhow::bail!("AMQP prefetch must be greater than 0");
        }

        if self.amqp.url.is_empty() {
            anyhow::bail!("AMQP URL cannot be empty");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if let Some(scheme_driver) = DbDriver::from_url(&self.database.url) {
            if scheme_driver != self.database.driver {
                anyhow::bail!(
                    "Database driver '{}' does not match URL scheme '{}'",
                    self.database.driver,
                    scheme_driver
                );
            }
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if (self.database.max_connections as usize) < self.bridge.pool_size {
            tracing::warn!(
                max_connections = self.database.max_connections,
                pool_size = self.bridge.pool_size,
                "Fewer database connections than workers; writes will wait for a connection"
            );
        }

        Ok(())
    }
}

impl BridgeConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl AmqpConfig {
    /// Broker URI with the configured credentials applied
    pub fn connection_url(&self) -> BridgeResult<String> {
        with_credentials(
            &self.url,
            self.username.as_deref(),
            self.password.as_deref(),
        )
    }

    /// Tag for the consumer owned by `worker_id`
    pub fn consumer_tag(&self, worker_id: usize) -> String {
        format!("{}-{}", self.consumer_tag_prefix, worker_id)
    }
}

impl DatabaseConfig {
    /// Database URL with the configured credentials applied
    pub fn connection_url(&self) -> BridgeResult<String> {
        with_credentials(
            &self.url,
            self.username.as_deref(),
            self.password.as_deref(),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig {
                queue_name: DEFAULT_QUEUE_NAME.to_string(),
                pool_size: DEFAULT_POOL_SIZE,
                write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            amqp: AmqpConfig {
                url: DEFAULT_AMQP_URL.to_string(),
                username: None,
                password: None,
                prefetch_count: DEFAULT_AMQP_PREFETCH,
                consumer_tag_prefix: DEFAULT_CONSUMER_TAG.to_string(),
                declare_queue: false,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                driver: DbDriver::Postgres,
                username: None,
                password: None,
                session_timezone: None,
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
        }
    }
}

/// Replace the user and password embedded in `raw` when overrides are given
pub fn with_credentials(
    raw: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> BridgeResult<String> {
    if username.is_none() && password.is_none() {
        return Ok(raw.to_string());
    }

    let mut url = Url::parse(raw)
        .map_err(|e| BridgeError::Config(format!("Invalid connection URL: {}", e)))?;

    if let Some(username) = username {
        url.set_username(username)
            .map_err(|_| BridgeError::Config("Connection URL cannot carry a username".into()))?;
    }

    if let Some(password) = password {
        url.set_password(Some(password))
            .map_err(|_| BridgeError::Config("Connection URL cannot carry a password".into()))?;
    }

    Ok(url.to_string())
}

/// Connection URL safe to log: the password, if any, is masked
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        },
        Err(_) => "<unparseable url>".to_string(),
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {:?} ({})", key, raw, e)),
        Err(_) => Ok(default),
    }
}
