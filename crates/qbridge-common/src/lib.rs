//! QBridge Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, payload decoding, and logging setup for the QBridge project.
//!
//! # Overview
//!
//! - **Payload**: decoding of raw queue bodies into [`ParsedRecord`]s
//! - **Error Handling**: [`ParseError`] for malformed payloads
//! - **Types**: records and per-message delivery outcomes
//! - **Logging**: `tracing` subscriber bootstrap shared by binaries
//!
//! # Example
//!
//! ```
//! use qbridge_common::payload;
//!
//! let record = payload::parse(b"42,hello").unwrap();
//! assert_eq!(record.key, 42);
//! assert_eq!(record.value, "hello");
//! ```

pub mod error;
pub mod logging;
pub mod payload;
pub mod types;

// Re-export commonly used types
pub use error::ParseError;
pub use types::{DeliveryOutcome, ParsedRecord};
