use super::payload::RawPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Where the value returned for a user came from during one resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    #[default]
    Database,
    Network,
}

/// Persisted ownership state of a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipRecord {
    pub user_id: String,
    pub display_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<RawPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub last_updated: DateTime<Utc>,
    /// Recomputed on every read; records loaded from disk are `Database`.
    #[serde(skip)]
    pub source_tier: SourceTier,
}

impl OwnershipRecord {
    /// Builds the record shape for a network outcome.
    ///
    /// `EmptyOwnership` keeps its payload with `success = false`; a `Failure`
    /// carries only the error.
    pub fn from_outcome(
        user_id: impl Into<String>,
        outcome: &FetchOutcome,
        now: DateTime<Utc>,
    ) -> Self {
        let user_id = user_id.into();
        let (success, raw_payload, error_message) = match outcome {
            FetchOutcome::Success { raw_payload } => (true, Some(raw_payload.clone()), None),
            FetchOutcome::EmptyOwnership { raw_payload } => {
                (false, Some(raw_payload.clone()), None)
            }
            FetchOutcome::Failure { error } => (false, None, Some(error.clone())),
        };
        let display_name = raw_payload
            .as_ref()
            .and_then(RawPayload::display_name)
            .unwrap_or_else(|| user_id.clone());

        Self {
            user_id,
            display_name,
            success,
            raw_payload,
            error_message,
            last_updated: now,
            source_tier: SourceTier::Network,
        }
    }

    pub fn ownership_ids(&self) -> Vec<String> {
        self.raw_payload
            .as_ref()
            .map(RawPayload::ownership_ids)
            .unwrap_or_default()
    }

    pub fn has_ownership(&self) -> bool {
        self.raw_payload
            .as_ref()
            .is_some_and(RawPayload::has_ownership)
    }
}

/// Result of a single upstream query after retries.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success { raw_payload: RawPayload },
    EmptyOwnership { raw_payload: RawPayload },
    Failure { error: String },
}

impl FetchOutcome {
    /// Classifies a successfully parsed payload by its ownership signal.
    pub fn from_payload(raw_payload: RawPayload) -> Self {
        if raw_payload.has_ownership() {
            Self::Success { raw_payload }
        } else {
            Self::EmptyOwnership { raw_payload }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Reference catalog entry for a static game entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub attributes: JsonMap<String, JsonValue>,
}

impl Descriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            attributes: JsonMap::new(),
        }
    }

    /// Stand-in returned for ids the catalog does not know.
    pub fn placeholder(id: &str) -> Self {
        Self::new(id, format!("unknown({})", id))
    }

    pub fn is_placeholder(&self) -> bool {
        self.attributes.is_empty() && self.name == format!("unknown({})", self.id)
    }

    /// Builds a descriptor from a catalog source entry keyed by `id`.
    ///
    /// The entry's `name` becomes the descriptor name; all other fields are
    /// kept as attributes. Entries without a usable name get the placeholder
    /// label.
    pub fn from_entry(id: &str, entry: &JsonValue) -> Self {
        let mut attributes = entry.as_object().cloned().unwrap_or_default();
        attributes.remove("id");
        let name = match attributes.remove("name") {
            Some(JsonValue::String(name)) if !name.trim().is_empty() => name,
            _ => format!("unknown({})", id),
        };
        Self {
            id: id.to_string(),
            name,
            attributes,
        }
    }
}

/// Per-user entry returned by the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResult {
    #[serde(rename = "userid")]
    pub user_id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    pub success: bool,
    #[serde(rename = "ownershipIds", default, skip_serializing_if = "Option::is_none")]
    pub ownership_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptors: Option<Vec<Descriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub source: SourceTier,
}

/// Outcome counts of a batch merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    pub total: usize,
    pub new_users: usize,
    pub updated_users: usize,
    pub skipped_users: usize,
}

/// Summary of the persisted document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_users: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub last_updated: Option<DateTime<Utc>>,
}
