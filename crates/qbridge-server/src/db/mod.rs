//! Database pool and destination-table writer
//!
//! The pool is an `sqlx` [`AnyPool`] so one binary serves PostgreSQL and
//! MySQL deployments. The driver only decides placeholder syntax; the pool
//! itself picks the wire driver from the URL scheme.

pub mod writer;

use serde::{Deserialize, Serialize};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use sqlx::Executor;
use std::time::Duration;
use url::Url;

use crate::config::{redact_url, DatabaseConfig};
use crate::error::{BridgeError, BridgeResult};

pub use writer::{InsertWriter, RecordSink, WriteError};

/// Database engines the bridge can write to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbDriver {
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
}

impl DbDriver {
    /// Driver implied by a connection URL's scheme, if recognized
    pub fn from_url(url: &str) -> Option<Self> {
        let url = Url::parse(url).ok()?;
        match url.scheme() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" | "mariadb" => Some(Self::MySql),
            _ => None,
        }
    }

    /// The single insert statement, with this driver's placeholders
    pub fn insert_statement(self) -> &'static str {
        match self {
            Self::Postgres => "INSERT INTO teste (col1, col2) VALUES ($1, $2)",
            Self::MySql => "INSERT INTO teste (col1, col2) VALUES (?, ?)",
        }
    }

    /// Statement that sets the session time zone from one bound parameter
    pub fn timezone_statement(self) -> &'static str {
        match self {
            Self::Postgres => "SELECT set_config('TimeZone', $1, false)",
            Self::MySql => "SET time_zone = ?",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        }
    }
}

impl std::str::FromStr for DbDriver {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            other => Err(BridgeError::Config(format!(
                "Unsupported database driver '{}'; use postgres or mysql",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DbDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connect the shared pool and prove it works.
///
/// Fails if no connection can be made within the acquire timeout; the caller
/// treats that as fatal.
pub async fn create_pool(config: &DatabaseConfig) -> BridgeResult<AnyPool> {
    sqlx::any::install_default_drivers();

    let url = config.connection_url()?;

    let mut options = AnyPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs));

    if let Some(timezone) = config.session_timezone.clone() {
        let statement = config.driver.timezone_statement();
        options = options.after_connect(move |conn, _meta| {
            let timezone = timezone.clone();
            Box::pin(async move {
                conn.execute(sqlx::query(statement).bind(timezone)).await?;
                Ok(())
            })
        });
    }

    let pool = options.connect(&url).await?;

    if let Err(e) = health_check(&pool).await {
        pool.close().await;
        return Err(e);
    }

    tracing::info!(
        url = %redact_url(&url),
        driver = %config.driver,
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        timezone = config.session_timezone.as_deref().unwrap_or("server default"),
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &AnyPool) -> BridgeResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(BridgeError::from)
}
