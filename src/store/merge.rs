//! Merge engine: decides whether an incoming record supersedes the stored one.
//!
//! A stored record is only rewritten when something semantically changed.
//! Skipped records keep their original `last_updated`, which staleness queries
//! rely on.

use super::document::StoreDocument;
use crate::core::{MergeStats, OwnershipRecord, SourceTier};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{Level, event};

/// Why an existing record was replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceReason {
    /// Stored failure, incoming success.
    Recovered,
    OwnershipChanged,
    DisplayNameChanged,
    PayloadChanged,
    ErrorChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    Insert,
    Replace(ReplaceReason),
    Skip,
}

/// Keeps one record per user id: the one with the latest `last_updated`.
///
/// Ties go to the record appearing later in the batch. The output keeps the
/// order in which each id first appeared.
pub fn dedupe_by_recency(incoming: Vec<OwnershipRecord>) -> Vec<OwnershipRecord> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<OwnershipRecord> = Vec::with_capacity(incoming.len());

    for record in incoming {
        match slots.get(&record.user_id) {
            Some(&slot) => {
                if record.last_updated >= kept[slot].last_updated {
                    kept[slot] = record;
                }
            }
            None => {
                slots.insert(record.user_id.clone(), kept.len());
                kept.push(record);
            }
        }
    }

    kept
}

/// Applies the replacement rules in order; the first match wins.
pub fn decide(existing: Option<&OwnershipRecord>, incoming: &OwnershipRecord) -> MergeDecision {
    let Some(existing) = existing else {
        return MergeDecision::Insert;
    };

    let both_succeeded = existing.success && incoming.success;

    if !existing.success && incoming.success {
        return MergeDecision::Replace(ReplaceReason::Recovered);
    }

    if both_succeeded && ownership_set(existing) != ownership_set(incoming) {
        return MergeDecision::Replace(ReplaceReason::OwnershipChanged);
    }

    if existing.display_name != incoming.display_name {
        return MergeDecision::Replace(ReplaceReason::DisplayNameChanged);
    }

    if both_succeeded && existing.raw_payload != incoming.raw_payload {
        return MergeDecision::Replace(ReplaceReason::PayloadChanged);
    }

    if !existing.success && !incoming.success && existing.error_message != incoming.error_message {
        return MergeDecision::Replace(ReplaceReason::ErrorChanged);
    }

    MergeDecision::Skip
}

/// Merges `incoming` into `document`, stamping every written record with
/// `now`. Returns the counts; `document.last_updated` is only touched when at
/// least one record was written.
pub fn merge_into(
    document: &mut StoreDocument,
    incoming: Vec<OwnershipRecord>,
    now: DateTime<Utc>,
) -> MergeStats {
    let candidates = dedupe_by_recency(incoming);
    let mut stats = MergeStats {
        total: candidates.len(),
        ..MergeStats::default()
    };

    for mut record in candidates {
        let decision = decide(document.users.get(&record.user_id), &record);
        event!(
            Level::DEBUG,
            user_id = %record.user_id,
            decision = ?decision,
            "merge decision"
        );

        match decision {
            MergeDecision::Insert => stats.new_users += 1,
            MergeDecision::Replace(_) => stats.updated_users += 1,
            MergeDecision::Skip => {
                stats.skipped_users += 1;
                continue;
            }
        }

        record.last_updated = now;
        record.source_tier = SourceTier::Database;
        document.users.insert(record.user_id.clone(), record);
    }

    if stats.new_users + stats.updated_users > 0 {
        document.last_updated = now;
    }
    stats
}

fn ownership_set(record: &OwnershipRecord) -> HashSet<String> {
    record.ownership_ids().into_iter().collect()
}
