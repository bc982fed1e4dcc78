//! Persistent ownership store.
//!
//! The whole document is loaded, changed in memory and written back on every
//! mutation. Writers inside one process are serialized by `write_lock`; there
//! is no protection against a second process writing the same file.

pub mod document;
pub mod merge;

pub use document::{STORE_FORMAT_VERSION, StoreDocument};
pub use merge::{MergeDecision, ReplaceReason, decide, dedupe_by_recency};

use crate::core::{Descriptor, MergeStats, OwnershipRecord, Result, StoreStats};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{Instrument, Level, event, info_span};

pub struct PersistentStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    loads: AtomicUsize,
}

impl PersistentStore {
    /// Opens the store at `path`. The file is created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<StoreDocument> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        StoreDocument::load(&self.path).await
    }

    /// Number of times the document has been read from disk since `open`.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    pub async fn read_record(&self, user_id: &str) -> Result<Option<OwnershipRecord>> {
        let mut document = self.load().await?;
        Ok(document.users.remove(user_id))
    }

    /// Looks up many ids against one load of the document. Ids without a
    /// record are absent from the returned map.
    pub async fn read_records<S: AsRef<str>>(
        &self,
        user_ids: &[S],
    ) -> Result<HashMap<String, OwnershipRecord>> {
        let mut document = self.load().await?;
        Ok(user_ids
            .iter()
            .filter_map(|id| document.users.remove_entry(id.as_ref()))
            .collect())
    }

    /// Merges a batch of records and persists the document if anything changed.
    pub async fn merge_batch(&self, incoming: Vec<OwnershipRecord>) -> Result<MergeStats> {
        if incoming.is_empty() {
            return Ok(MergeStats::default());
        }

        let span = info_span!("store.merge_batch", incoming = incoming.len());
        async move {
            let _guard = self.write_lock.lock().await;
            let mut document = self.load().await?;
            let stats = merge::merge_into(&mut document, incoming, Utc::now());

            if stats.new_users + stats.updated_users > 0 {
                document.save(&self.path).await?;
            }

            event!(
                Level::INFO,
                total = stats.total,
                new_users = stats.new_users,
                updated_users = stats.updated_users,
                skipped_users = stats.skipped_users,
                "merge complete"
            );
            Ok(stats)
        }
        .instrument(span)
        .await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let Some(document) = StoreDocument::load_existing(&self.path).await? else {
            return Ok(StoreStats::default());
        };
        let successful = document.users.values().filter(|r| r.success).count();
        Ok(StoreStats {
            total_users: document.users.len(),
            successful_queries: successful,
            failed_queries: document.users.len() - successful,
            last_updated: Some(document.last_updated),
        })
    }

    /// Ids whose record was last written before `now - max_age`.
    pub async fn stale_ids(&self, max_age: Duration) -> Result<Vec<String>> {
        self.stale_ids_at(Utc::now(), max_age).await
    }

    pub async fn stale_ids_at(&self, now: DateTime<Utc>, max_age: Duration) -> Result<Vec<String>> {
        let document = self.load().await?;
        let cutoff = now - max_age;
        Ok(document
            .users
            .values()
            .filter(|record| record.last_updated < cutoff)
            .map(|record| record.user_id.clone())
            .collect())
    }

    /// Removes a record. Returns `false` when the id was not stored.
    pub async fn delete_record(&self, user_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load().await?;
        if document.users.remove(user_id).is_none() {
            return Ok(false);
        }

        document.last_updated = Utc::now();
        document.save(&self.path).await?;
        event!(Level::INFO, user_id = %user_id, "record deleted");
        Ok(true)
    }

    pub async fn reference_snapshot(&self) -> Result<Option<BTreeMap<String, Descriptor>>> {
        Ok(self.load().await?.reference_snapshot)
    }

    /// Adds catalog entries to the cached snapshot. Existing ids are kept as
    /// they are; returns how many entries were added.
    pub async fn save_reference_snapshot(
        &self,
        entries: BTreeMap<String, Descriptor>,
    ) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load().await?;
        let snapshot = document.reference_snapshot.get_or_insert_with(BTreeMap::new);

        let mut added = 0;
        for (id, descriptor) in entries {
            if !snapshot.contains_key(&id) {
                snapshot.insert(id, descriptor);
                added += 1;
            }
        }

        if added > 0 {
            document.last_updated = Utc::now();
            document.save(&self.path).await?;
        }
        Ok(added)
    }
}
