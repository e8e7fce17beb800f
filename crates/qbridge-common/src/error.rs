//! Error types for payload decoding

use thiserror::Error;

/// Result type alias for payload decoding
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// A message body that can never become a record.
///
/// Every variant is permanent: redelivering the same bytes fails the same way.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Expected 2 comma-separated fields, found {found}")]
    WrongFieldCount { found: usize },

    #[error("Key field is not a base-10 integer: {field:?}")]
    InvalidKey { field: String },
}
