//! Common types used across QBridge

use serde::{Deserialize, Serialize};

/// A decoded message: one row for the destination table.
///
/// `value` is kept exactly as it appeared in the payload, surrounding
/// whitespace included.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParsedRecord {
    pub key: i32,
    pub value: String,
}

impl ParsedRecord {
    pub fn new(key: i32, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for ParsedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {:?})", self.key, self.value)
    }
}

/// Terminal result of handling one delivery.
///
/// Produced exactly once per message and mapped onto the broker's
/// acknowledgment verbs:
///
/// | outcome | broker action |
/// |---|---|
/// | `Acknowledged` | `basic.ack` |
/// | `Rejected` | `basic.reject(requeue = false)` |
/// | `Requeued` | `basic.reject(requeue = true)` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The row was written; the message is done.
    Acknowledged,
    /// The message can never succeed and is dropped.
    Rejected { reason: String },
    /// The failure may clear up; the broker gets the message back.
    Requeued { reason: String },
}

impl DeliveryOutcome {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn requeued(reason: impl Into<String>) -> Self {
        Self::Requeued {
            reason: reason.into(),
        }
    }

    /// Whether the broker should offer this message again.
    pub fn requeue(&self) -> bool {
        matches!(self, Self::Requeued { .. })
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Rejected { reason } => write!(f, "rejected: {}", reason),
            Self::Requeued { reason } => write!(f, "requeued: {}", reason),
        }
    }
}
