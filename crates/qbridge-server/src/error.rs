//! Server-specific error types

use thiserror::Error;

use crate::queue::QueueError;
use crate::service::ServiceState;

/// Result type alias for bridge lifecycle operations
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Errors that stop the bridge from starting or stopping cleanly.
///
/// Per-message failures never surface here; workers classify them into a
/// [`DeliveryOutcome`](qbridge_common::DeliveryOutcome) instead.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid lifecycle transition: cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: ServiceState,
    },
}

impl BridgeError {
    pub fn invalid_state(action: &'static str, state: ServiceState) -> Self {
        Self::InvalidState { action, state }
    }
}
