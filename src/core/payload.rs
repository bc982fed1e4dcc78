//! Opaque upstream payload and the ownership extraction rule.
//!
//! The upstream response is stored verbatim. Everything the ledger needs from
//! it (status code, display name, ownership ids) is read through the accessors
//! below so that no other module pattern-matches the raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

/// Delimiter used by the primary ownership field.
pub const OWNERSHIP_DELIMITER: char = '#';

const DATA_FIELD: &str = "data";
const STATUS_FIELD: &str = "code";
const MESSAGE_FIELDS: [&str; 2] = ["msg", "message"];
const OWNERSHIP_FIELD: &str = "pmr";
const EVENTS_FIELD: &str = "logs";
const EVENT_ID_FIELDS: [&str; 3] = ["petid", "petId", "id"];
const NAME_FIELDS: [&str; 3] = ["userName", "nickname", "name"];

/// Unmodified upstream response body, parsed as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawPayload(JsonValue);

impl RawPayload {
    pub fn new(value: JsonValue) -> Self {
        Self(value)
    }

    pub fn as_json(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_json(self) -> JsonValue {
        self.0
    }

    /// Application-level status code. A payload without one is treated as `0`.
    pub fn status_code(&self) -> i64 {
        match self.0.get(STATUS_FIELD) {
            Some(JsonValue::Number(n)) => n.as_i64().unwrap_or(-1),
            Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(-1),
            Some(JsonValue::Null) | None => 0,
            Some(_) => -1,
        }
    }

    pub fn message(&self) -> Option<String> {
        MESSAGE_FIELDS
            .iter()
            .find_map(|field| self.0.get(*field).and_then(JsonValue::as_str))
            .map(str::to_string)
    }

    pub fn display_name(&self) -> Option<String> {
        let data = self.data()?;
        NAME_FIELDS
            .iter()
            .filter_map(|field| data.get(*field).and_then(JsonValue::as_str))
            .map(str::trim)
            .find(|name| !name.is_empty())
            .map(str::to_string)
    }

    /// Extracts the ownership ids held by the user.
    ///
    /// Ids come first from the `#`-separated primary field, blanks dropped.
    /// Every event in the secondary list that carries an id not seen yet is
    /// appended after them. Order is first-seen and the result has no
    /// duplicates.
    pub fn ownership_ids(&self) -> Vec<String> {
        let Some(data) = self.data() else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        if let Some(primary) = data.get(OWNERSHIP_FIELD).and_then(JsonValue::as_str) {
            for id in primary
                .split(OWNERSHIP_DELIMITER)
                .map(str::trim)
                .filter(|id| !id.is_empty())
            {
                if seen.insert(id.to_string()) {
                    ids.push(id.to_string());
                }
            }
        }

        if let Some(events) = data.get(EVENTS_FIELD).and_then(JsonValue::as_array) {
            for event in events {
                let Some(id) = event_id(event) else { continue };
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }

        ids
    }

    pub fn has_ownership(&self) -> bool {
        !self.ownership_ids().is_empty()
    }

    fn data(&self) -> Option<&JsonValue> {
        self.0.get(DATA_FIELD).filter(|data| data.is_object())
    }
}

impl From<JsonValue> for RawPayload {
    fn from(value: JsonValue) -> Self {
        Self::new(value)
    }
}

fn event_id(event: &JsonValue) -> Option<String> {
    EVENT_ID_FIELDS.iter().find_map(|field| match event.get(*field)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
