//! Newline-delimited JSON framing shared by both telemetry streams.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::ProtocolError;

/// Content type of every telemetry stream.
pub const NDJSON: &str = "application/x-ndjson";

/// Serializes `value` as one compact JSON line, newline included.
pub fn encode_line<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    Ok(line)
}

/// Parses one line of a stream. Surrounding whitespace is ignored.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::EmptyLine);
    }
    Ok(serde_json::from_str(trimmed)?)
}
