//! QBridge Server Library
//!
//! Moves messages from an AMQP queue into a relational table.
//!
//! # Overview
//!
//! Every message on the queue carries a payload of the form `<int>,<string>`.
//! A pool of workers consumes the queue concurrently; each worker parses a
//! payload, inserts it as one row, and then settles the message with the
//! broker:
//!
//! - **Written**: the message is acknowledged
//! - **Malformed payload** or **permanent write failure**: rejected and
//!   discarded
//! - **Transient write failure**: rejected and requeued for redelivery
//!
//! Acknowledgment happens only after the row is committed, so delivery is
//! at-least-once. A crash between commit and ack produces a duplicate row.
//!
//! # Modules
//!
//! - [`config`]: environment-based configuration
//! - [`queue`]: broker ingress behind the [`queue::QueueConnection`] trait
//! - [`db`]: connection pool and the [`db::writer::InsertWriter`]
//! - [`consumer`]: the worker pool and per-message decisions
//! - [`service`]: lifecycle that acquires and releases all of the above
//!
//! # Example
//!
//! ```no_run
//! use qbridge_server::{config::Config, service::BridgeService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut service = BridgeService::new(Config::load()?);
//!     service.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     service.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod consumer;
pub mod db;
pub mod error;
pub mod queue;
pub mod service;

// Re-export commonly used types
pub use error::{BridgeError, BridgeResult};
pub use service::{BridgeService, ServiceState};
