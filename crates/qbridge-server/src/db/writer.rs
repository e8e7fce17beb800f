//! Insert Writer
//!
//! Writes one [`ParsedRecord`] as one row. Values are always bound as
//! positional parameters; the statement text never changes. Each insert runs
//! in the pool's autocommit mode, so a failed statement leaves no row behind.

use async_trait::async_trait;
use qbridge_common::ParsedRecord;
use sqlx::AnyPool;
use sqlx::error::{DatabaseError, ErrorKind};
use sqlx::mysql::MySqlDatabaseError;
use std::time::Duration;
use thiserror::Error;

use super::DbDriver;

/// Why a record could not be written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// May succeed if the same message is tried again later.
    #[error("Transient write failure: {0}")]
    Transient(String),

    /// Will fail the same way every time.
    #[error("Permanent write failure: {0}")]
    Permanent(String),
}

impl WriteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Anything that can persist a record.
///
/// Implementations must be safe to call from every worker at once.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write(&self, record: &ParsedRecord) -> Result<(), WriteError>;
}

/// Writes records into the destination table through the shared pool.
#[derive(Clone)]
pub struct InsertWriter {
    pool: AnyPool,
    statement: &'static str,
    timeout: Duration,
}

impl InsertWriter {
    pub fn new(pool: AnyPool, driver: DbDriver, timeout: Duration) -> Self {
        Self {
            pool,
            statement: driver.insert_statement(),
            timeout,
        }
    }
}

#[async_trait]
impl RecordSink for InsertWriter {
    async fn write(&self, record: &ParsedRecord) -> Result<(), WriteError> {
        let insert = sqlx::query(self.statement)
            .bind(record.key)
            .bind(record.value.as_str())
            .execute(&self.pool);

        let result = match tokio::time::timeout(self.timeout, insert).await {
            Ok(result) => result.map_err(classify)?,
            Err(_) => {
                return Err(WriteError::Transient(format!(
                    "insert did not complete within {:?}",
                    self.timeout
                )))
            },
        };

        match result.rows_affected() {
            1 => Ok(()),
            n => Err(WriteError::Permanent(format!(
                "insert affected {} rows, expected 1",
                n
            ))),
        }
    }
}

/// Sort a driver error into retry-later or never-retry.
pub fn classify(err: sqlx::Error) -> WriteError {
    let transient = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => is_transient_database_error(db_err.as_ref()),
        _ => false,
    };

    if transient {
        WriteError::Transient(err.to_string())
    } else {
        WriteError::Permanent(err.to_string())
    }
}

fn is_transient_database_error(db_err: &(dyn DatabaseError + 'static)) -> bool {
    match db_err.kind() {
        ErrorKind::UniqueViolation
        | ErrorKind::ForeignKeyViolation
        | ErrorKind::NotNullViolation
        | ErrorKind::CheckViolation => return false,
        _ => {},
    }

    // MySQL reports lock wait timeouts and similar under the catch-all
    // SQLSTATE HY000; only the error number tells them apart.
    if let Some(mysql_err) = db_err.try_downcast_ref::<MySqlDatabaseError>() {
        if is_transient_mysql_error(mysql_err.number()) {
            return true;
        }
    }

    db_err.code().is_some_and(|code| is_transient_sqlstate(&code))
}

/// MySQL server and client error numbers worth a redelivery.
pub fn is_transient_mysql_error(number: u16) -> bool {
    matches!(
        number,
        1040 // ER_CON_COUNT_ERROR (too many connections)
            | 1053 // ER_SERVER_SHUTDOWN
            | 1205 // ER_LOCK_WAIT_TIMEOUT
            | 1213 // ER_LOCK_DEADLOCK
            | 2006 // CR_SERVER_GONE_ERROR
            | 2013 // CR_SERVER_LOST
            | 3024 // ER_QUERY_TIMEOUT
    )
}

/// SQLSTATE codes worth a redelivery: lost connections, deadlocks,
/// serialization failures, timeouts, and servers going away.
pub fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08")
        || matches!(
            code,
            "40001" // serialization_failure (MySQL deadlock)
                | "40P01" // deadlock_detected
                | "57014" // query_canceled (statement timeout)
                | "57P01" // admin_shutdown
                | "57P02" // crash_shutdown
                | "57P03" // cannot_connect_now
                | "53300" // too_many_connections
                | "55P03" // lock_not_available
                | "HYT00" // timeout expired
        )
}
