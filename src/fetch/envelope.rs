//! Response body decoding.
//!
//! The upstream service may answer with plain JSON or with a callback envelope
//! such as `jQuery171_0172({...});`. The envelope is stripped when present; if
//! the inner text does not parse, the raw body is tried as-is.

use crate::core::{LedgerError, Result};
use serde_json::Value as JsonValue;
use tracing::debug;

/// Returns the text between the callback parentheses, or `None` when the body
/// is not wrapped.
pub fn strip_envelope(body: &str) -> Option<&str> {
    let trimmed = body.trim();
    let open = trimmed.find('(')?;
    let callback = trimmed[..open].trim();
    if callback.is_empty() || !callback.chars().all(is_callback_char) {
        return None;
    }

    let tail = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    let close = tail.strip_suffix(')')?;
    close.get(open + 1..)
}

/// Parses a response body into JSON, unwrapping a callback envelope first.
pub fn parse_body(body: &str) -> Result<JsonValue> {
    if let Some(inner) = strip_envelope(body) {
        match serde_json::from_str(inner) {
            Ok(value) => return Ok(value),
            Err(err) => debug!(error = %err, "envelope content unparseable, trying raw body"),
        }
    }

    serde_json::from_str(body.trim())
        .map_err(|err| LedgerError::ParseError(format!("unparseable response body: {}", err)))
}

fn is_callback_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.')
}
