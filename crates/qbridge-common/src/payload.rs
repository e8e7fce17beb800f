//! Payload decoding
//!
//! A message body is UTF-8 text of the form `<key>,<value>`: exactly two
//! comma-separated fields, the first a base-10 `i32`. The value is taken
//! verbatim, so `"1, a "` yields the value `" a "`.

use crate::error::{ParseError, ParseResult};
use crate::types::ParsedRecord;

/// Field separator inside a message body.
pub const FIELD_SEPARATOR: char = ',';

/// Decode a raw message body into a record.
pub fn parse(bytes: &[u8]) -> ParseResult<ParsedRecord> {
    let text = std::str::from_utf8(bytes)?;

    let mut fields = text.split(FIELD_SEPARATOR);
    let (key, value) = match (fields.next(), fields.next(), fields.next()) {
        (Some(key), Some(value), None) => (key, value),
        _ => {
            return Err(ParseError::WrongFieldCount {
                found: text.split(FIELD_SEPARATOR).count(),
            })
        },
    };

    let key = key.parse::<i32>().map_err(|_| ParseError::InvalidKey {
        field: key.to_string(),
    })?;

    Ok(ParsedRecord::new(key, value))
}
