//! Batch resolution of user ownership.
//!
//! Flow for one call:
//! 1. deduplicate the requested ids
//! 2. look every id up in one snapshot of the store
//! 3. answer ids whose stored payload has ownership directly (`database` tier)
//! 4. fetch the rest from upstream in fixed-size waves (`network` tier)
//! 5. merge successful network results back into the store in one batch
//!
//! Per-id failures become `success = false` entries; they never abort the batch.

use crate::catalog::ReferenceCatalog;
use crate::config::WavePolicy;
use crate::core::{
    FetchOutcome, LedgerError, MergeStats, OwnershipRecord, Result, SourceTier, UserResult,
};
use crate::fetch::OwnershipSource;
use crate::store::PersistentStore;
use chrono::{Duration, Utc};
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{Instrument, Level, event, info_span};

/// Results of one resolve call plus the outcome of persisting them.
#[derive(Debug)]
pub struct ResolveReport {
    pub results: Vec<UserResult>,
    /// Merge of the successful network results. An empty batch merges to
    /// default stats without touching the store.
    pub persisted: Result<MergeStats>,
}

pub struct BatchResolver {
    store: Arc<PersistentStore>,
    catalog: Arc<ReferenceCatalog>,
    source: Arc<dyn OwnershipSource>,
    waves: WavePolicy,
}

impl BatchResolver {
    pub fn new(
        store: Arc<PersistentStore>,
        catalog: Arc<ReferenceCatalog>,
        source: Arc<dyn OwnershipSource>,
        waves: WavePolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            source,
            waves,
        }
    }

    /// Resolves every unique id in `ids`. The result holds one entry per
    /// unique id, sorted by user id.
    ///
    /// Fails only on malformed input (a blank id). A failure to persist the
    /// network results is logged and otherwise dropped, so the store may lag
    /// behind the returned results; use [`BatchResolver::resolve_with_stats`]
    /// to observe it.
    pub async fn resolve(&self, ids: &[String]) -> Result<Vec<UserResult>> {
        Ok(self.resolve_with_stats(ids).await?.results)
    }

    /// Same as [`BatchResolver::resolve`], also reporting how the network
    /// results were merged into the store.
    pub async fn resolve_with_stats(&self, ids: &[String]) -> Result<ResolveReport> {
        let unique = unique_ids(ids)?;
        let span = info_span!("resolver.resolve", requested = ids.len(), unique = unique.len());
        Ok(self.resolve_unique(unique, false).instrument(span).await)
    }

    /// Re-fetches every record older than `max_age`, bypassing store hits.
    pub async fn refresh_stale(&self, max_age: Duration) -> Result<ResolveReport> {
        let stale = self.store.stale_ids(max_age).await?;
        let span = info_span!("resolver.refresh_stale", stale = stale.len());
        Ok(self
            .resolve_unique(stale.into_iter().collect(), true)
            .instrument(span)
            .await)
    }

    async fn resolve_unique(&self, unique: BTreeSet<String>, force_network: bool) -> ResolveReport {
        let mut results = Vec::with_capacity(unique.len());
        let mut network_ids = Vec::new();

        if force_network {
            network_ids.extend(unique);
        } else {
            let ids: Vec<String> = unique.into_iter().collect();
            let mut stored = match self.store.read_records(&ids).await {
                Ok(stored) => stored,
                Err(err) => {
                    event!(
                        Level::WARN,
                        error = %err,
                        ids = ids.len(),
                        "store read failed, falling back to network"
                    );
                    HashMap::new()
                }
            };

            for user_id in ids {
                match stored.remove(&user_id) {
                    Some(record) if record.has_ownership() => {
                        results.push(self.format_stored(record));
                    }
                    _ => network_ids.push(user_id),
                }
            }
        }

        event!(
            Level::INFO,
            database_hits = results.len(),
            network = network_ids.len(),
            "tier split"
        );

        let mut staged = Vec::new();
        for (user_id, outcome) in self.fetch_in_waves(network_ids).await {
            if outcome.is_success() {
                staged.push(OwnershipRecord::from_outcome(&user_id, &outcome, Utc::now()));
            }
            results.push(self.format_fetched(user_id, outcome));
        }

        let persisted = self.store.merge_batch(staged).await;
        if let Err(err) = &persisted {
            event!(Level::ERROR, error = %err, "persisting network results failed");
        }

        results.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        ResolveReport { results, persisted }
    }

    /// Fetches `ids` in waves of `wave_size`, pausing between waves.
    async fn fetch_in_waves(&self, ids: Vec<String>) -> Vec<(String, FetchOutcome)> {
        let wave_size = self.waves.wave_size.max(1);
        let wave_count = ids.len().div_ceil(wave_size);
        let mut outcomes = Vec::with_capacity(ids.len());

        for (index, wave) in ids.chunks(wave_size).enumerate() {
            if index > 0 {
                sleep(self.waves.pause()).await;
            }

            let span = info_span!("resolver.wave", wave = index + 1, of = wave_count, size = wave.len());
            let fetched = join_all(wave.iter().map(|user_id| async move {
                let outcome = self.source.fetch(user_id).await;
                (user_id.clone(), outcome)
            }))
            .instrument(span)
            .await;
            outcomes.extend(fetched);
        }

        outcomes
    }

    fn format_stored(&self, record: OwnershipRecord) -> UserResult {
        let ownership_ids = record.ownership_ids();
        UserResult {
            user_id: record.user_id,
            user_name: record.display_name,
            success: true,
            descriptors: Some(self.catalog.lookup_all(&ownership_ids)),
            ownership_ids: Some(ownership_ids),
            error: None,
            source: SourceTier::Database,
        }
    }

    fn format_fetched(&self, user_id: String, outcome: FetchOutcome) -> UserResult {
        match outcome {
            FetchOutcome::Success { raw_payload } => {
                let ownership_ids = raw_payload.ownership_ids();
                UserResult {
                    user_name: raw_payload.display_name().unwrap_or_else(|| user_id.clone()),
                    user_id,
                    success: true,
                    descriptors: Some(self.catalog.lookup_all(&ownership_ids)),
                    ownership_ids: Some(ownership_ids),
                    error: None,
                    source: SourceTier::Network,
                }
            }
            FetchOutcome::EmptyOwnership { raw_payload } => UserResult {
                user_name: raw_payload.display_name().unwrap_or_else(|| user_id.clone()),
                user_id,
                success: false,
                ownership_ids: Some(Vec::new()),
                descriptors: None,
                error: None,
                source: SourceTier::Network,
            },
            FetchOutcome::Failure { error } => UserResult {
                user_name: user_id.clone(),
                user_id,
                success: false,
                ownership_ids: None,
                descriptors: None,
                error: Some(error),
                source: SourceTier::Network,
            },
        }
    }
}

fn unique_ids(ids: &[String]) -> Result<BTreeSet<String>> {
    ids.iter()
        .map(|id| {
            let trimmed = id.trim();
            if trimmed.is_empty() {
                Err(LedgerError::InvalidInput("user id cannot be blank".to_string()))
            } else {
                Ok(trimmed.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Descriptor, RawPayload};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::time::Instant;

    /// Upstream stand-in answering from a fixed table and recording calls.
    #[derive(Default)]
    struct ScriptedSource {
        answers: HashMap<String, FetchOutcome>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn with(mut self, user_id: &str, outcome: FetchOutcome) -> Self {
            self.answers.insert(user_id.to_string(), outcome);
            self
        }

        fn calls(&self) -> Vec<String> {
            let mut calls = self.calls.lock().unwrap().clone();
            calls.sort();
            calls
        }
    }

    #[async_trait]
    impl OwnershipSource for ScriptedSource {
        async fn fetch(&self, user_id: &str) -> FetchOutcome {
            self.calls.lock().unwrap().push(user_id.to_string());
            self.answers
                .get(user_id)
                .cloned()
                .unwrap_or_else(|| FetchOutcome::Failure {
                    error: "Transport error: connection refused".to_string(),
                })
        }
    }

    /// Source that holds each fetch open briefly and records the peak number
    /// of fetches in flight at once.
    #[derive(Default)]
    struct InflightSource {
        current: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OwnershipSource for InflightSource {
        async fn fetch(&self, user_id: &str) -> FetchOutcome {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            sleep(std::time::Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            owned("1", user_id)
        }
    }

    fn owned(pmr: &str, name: &str) -> FetchOutcome {
        FetchOutcome::from_payload(RawPayload::new(json!({
            "code": 0,
            "data": { "pmr": pmr, "userName": name }
        })))
    }

    fn fast_waves(wave_size: usize) -> WavePolicy {
        WavePolicy {
            wave_size,
            min_pause_ms: 0,
            max_pause_ms: 0,
        }
    }

    fn resolver(
        dir: &TempDir,
        source: Arc<dyn OwnershipSource>,
        waves: WavePolicy,
    ) -> (BatchResolver, Arc<PersistentStore>) {
        let store = Arc::new(PersistentStore::open(dir.path().join("store.json")));
        let catalog = Arc::new(ReferenceCatalog::new([(
            "100".to_string(),
            Descriptor::new("100", "Ember Fox"),
        )]));
        (
            BatchResolver::new(store.clone(), catalog, source, waves),
            store,
        )
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_store_hit_and_network_miss() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::default().with("u2", owned("300#400", "Bo")));
        let (resolver, store) = resolver(&dir, source.clone(), fast_waves(50));

        let seeded = OwnershipRecord::from_outcome("u1", &owned("100#200", "Al"), Utc::now());
        store.merge_batch(vec![seeded]).await.unwrap();
        let u1_stamp = store.read_record("u1").await.unwrap().unwrap().last_updated;

        let results = resolver.resolve(&ids(&["u1", "u1", "u2"])).await.unwrap();
        assert_eq!(results.len(), 2);

        assert_eq!(results[0].user_id, "u1");
        assert_eq!(results[0].source, SourceTier::Database);
        assert_eq!(results[0].ownership_ids, Some(ids(&["100", "200"])));
        let names: Vec<_> = results[0]
            .descriptors
            .as_ref()
            .unwrap()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(names, vec!["Ember Fox", "unknown(200)"]);

        assert_eq!(results[1].user_id, "u2");
        assert_eq!(results[1].source, SourceTier::Network);
        assert_eq!(results[1].user_name, "Bo");
        assert_eq!(results[1].ownership_ids, Some(ids(&["300", "400"])));

        assert_eq!(source.calls(), vec!["u2"]);
        assert_eq!(
            store.read_record("u1").await.unwrap().unwrap().last_updated,
            u1_stamp
        );
        assert_eq!(
            store.read_record("u2").await.unwrap().unwrap().ownership_ids(),
            ids(&["300", "400"])
        );
    }

    #[tokio::test]
    async fn test_failures_and_empty_ownership_are_data() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::default().with("empty", owned("", "Nil")));
        let (resolver, store) = resolver(&dir, source, fast_waves(50));

        let results = resolver.resolve(&ids(&["empty", "down"])).await.unwrap();
        assert_eq!(results.len(), 2);

        let down = &results[0];
        assert_eq!(down.user_id, "down");
        assert!(!down.success);
        assert!(down.error.as_deref().unwrap().contains("connection refused"));
        assert_eq!(down.ownership_ids, None);

        let empty = &results[1];
        assert!(!empty.success);
        assert_eq!(empty.error, None);
        assert_eq!(empty.ownership_ids, Some(Vec::new()));
        assert_eq!(empty.user_name, "Nil");

        assert_eq!(store.stats().await.unwrap().total_users, 0);
    }

    #[tokio::test]
    async fn test_stored_record_without_ownership_goes_to_network() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::default().with("u1", owned("5", "Al")));
        let (resolver, store) = resolver(&dir, source.clone(), fast_waves(50));

        let failed = OwnershipRecord::from_outcome(
            "u1",
            &FetchOutcome::Failure {
                error: "timeout".into(),
            },
            Utc::now(),
        );
        store.merge_batch(vec![failed]).await.unwrap();

        let results = resolver.resolve(&ids(&["u1"])).await.unwrap();
        assert_eq!(results[0].source, SourceTier::Network);
        assert!(results[0].success);
        assert_eq!(source.calls(), vec!["u1"]);
        assert!(store.read_record("u1").await.unwrap().unwrap().success);
    }

    #[tokio::test]
    async fn test_corrupt_store_degrades_to_network() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::default().with("u1", owned("5", "Al")));
        let (resolver, store) = resolver(&dir, source.clone(), fast_waves(50));
        std::fs::write(store.path(), b"not json").unwrap();

        let results = resolver.resolve(&ids(&["u1"])).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, SourceTier::Network);
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn test_store_hits_share_one_document_load() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::default());
        let (resolver, store) = resolver(&dir, source.clone(), fast_waves(50));

        let all: Vec<String> = (0..40).map(|i| format!("u{i}")).collect();
        let seeded = all
            .iter()
            .map(|id| OwnershipRecord::from_outcome(id, &owned("7#8", id), Utc::now()))
            .collect();
        store.merge_batch(seeded).await.unwrap();

        let before = store.load_count();
        let results = resolver.resolve(&all).await.unwrap();

        assert_eq!(store.load_count() - before, 1);
        assert_eq!(results.len(), 40);
        assert!(results.iter().all(|r| r.source == SourceTier::Database));
        assert!(source.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wave_size_bounds_concurrent_fetches() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(InflightSource::default());
        let (resolver, _) = resolver(&dir, source.clone(), fast_waves(3));

        let all: Vec<String> = (0..10).map(|i| format!("u{i}")).collect();
        let results = resolver.resolve(&all).await.unwrap();

        assert_eq!(results.len(), 10);
        assert_eq!(source.calls.load(Ordering::SeqCst), 10);
        assert_eq!(source.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_between_waves() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(InflightSource::default());
        let waves = WavePolicy {
            wave_size: 2,
            min_pause_ms: 300,
            max_pause_ms: 300,
        };
        let (resolver, _) = resolver(&dir, source, waves);

        let all: Vec<String> = (0..6).map(|i| format!("u{i}")).collect();
        let started = Instant::now();
        resolver.resolve(&all).await.unwrap();
        let elapsed = started.elapsed();

        // Three waves: two pauses, none before the first or after the last.
        assert!(elapsed >= std::time::Duration::from_millis(600), "{elapsed:?}");
        assert!(elapsed < std::time::Duration::from_millis(900), "{elapsed:?}");
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::default().with("u1", owned("5", "Al")));
        // A directory cannot be read or replaced as a document.
        let store = Arc::new(PersistentStore::open(dir.path()));
        let resolver = BatchResolver::new(
            store,
            Arc::new(ReferenceCatalog::empty()),
            source,
            fast_waves(50),
        );

        let report = resolver.resolve_with_stats(&ids(&["u1"])).await.unwrap();
        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].success);
        assert!(matches!(report.persisted, Err(LedgerError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_nothing_to_persist_reports_default_stats() {
        let dir = TempDir::new().unwrap();
        let (resolver, store) = resolver(&dir, Arc::new(ScriptedSource::default()), fast_waves(50));

        let report = resolver.resolve_with_stats(&ids(&["down"])).await.unwrap();
        assert!(!report.results[0].success);
        assert_eq!(report.persisted.unwrap(), MergeStats::default());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_waves_cover_every_id() {
        let dir = TempDir::new().unwrap();
        let mut scripted = ScriptedSource::default();
        let all: Vec<String> = (0..7).map(|i| format!("u{i}")).collect();
        for (i, id) in all.iter().enumerate() {
            scripted = scripted.with(id, owned(&i.to_string(), id));
        }
        let source = Arc::new(scripted);
        let (resolver, store) = resolver(&dir, source.clone(), fast_waves(3));

        let results = resolver.resolve(&all).await.unwrap();
        assert_eq!(results.len(), 7);
        assert!(results.iter().all(|r| r.success && r.source == SourceTier::Network));
        assert_eq!(source.calls(), all);
        assert_eq!(store.stats().await.unwrap().total_users, 7);

        let again = resolver.resolve(&all).await.unwrap();
        assert!(again.iter().all(|r| r.source == SourceTier::Database));
        assert_eq!(source.calls().len(), 7);
    }

    #[tokio::test]
    async fn test_blank_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (resolver, _) = resolver(&dir, Arc::new(ScriptedSource::default()), fast_waves(50));
        let err = resolver.resolve(&ids(&["u1", "  "])).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_refresh_stale_forces_network() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::default().with("u1", owned("1#2#3", "Al")));
        let (resolver, store) = resolver(&dir, source.clone(), fast_waves(50));

        let mut old = OwnershipRecord::from_outcome("u1", &owned("1#2", "Al"), Utc::now());
        old.last_updated = Utc::now() - Duration::days(3);
        let mut document = store.load().await.unwrap();
        document.users.insert("u1".into(), old);
        document.save(store.path()).await.unwrap();

        let report = resolver.refresh_stale(Duration::hours(24)).await.unwrap();
        assert_eq!(report.persisted.unwrap().updated_users, 1);
        let results = report.results;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, SourceTier::Network);
        assert_eq!(source.calls(), vec!["u1"]);
        assert!(store.stale_ids(Duration::hours(24)).await.unwrap().is_empty());
        assert_eq!(
            store.read_record("u1").await.unwrap().unwrap().ownership_ids(),
            ids(&["1", "2", "3"])
        );
    }
}
