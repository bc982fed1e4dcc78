//! Read-only reference catalog of static game entities.
//!
//! The catalog is built once at startup by [`CatalogLoader`] and then shared
//! immutably. Lookups never fail: unknown ids come back as placeholders.

use crate::config::LedgerConfig;
use crate::core::{Descriptor, LedgerError, Result};
use crate::store::PersistentStore;
use crate::store::document::atomic_write;
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct ReferenceCatalog {
    entries: HashMap<String, Descriptor>,
}

impl ReferenceCatalog {
    pub fn new(entries: impl IntoIterator<Item = (String, Descriptor)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: &str) -> Descriptor {
        self.entries
            .get(id)
            .cloned()
            .unwrap_or_else(|| Descriptor::placeholder(id))
    }

    pub fn lookup_all(&self, ids: &[String]) -> Vec<Descriptor> {
        ids.iter().map(|id| self.lookup(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which source answered when the catalog was loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogSource {
    Snapshot,
    FileCache,
    Network,
    Empty,
}

/// Builds the catalog from the first source that has entries: the store's
/// reference snapshot, then the local file cache, then the network.
pub struct CatalogLoader<'a> {
    store: &'a PersistentStore,
    cache_path: Option<PathBuf>,
    url: Option<String>,
    client: Client,
}

impl<'a> CatalogLoader<'a> {
    pub fn new(store: &'a PersistentStore, config: &LedgerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| LedgerError::Config(format!("Failed to build HTTP client: {}", err)))?;

        Ok(Self {
            store,
            cache_path: config.catalog_cache_path.clone(),
            url: config.catalog_url.clone(),
            client,
        })
    }

    /// Loads the catalog. A source that fails is logged and skipped; when all
    /// of them come up empty the catalog is empty.
    pub async fn load(&self) -> Result<(ReferenceCatalog, CatalogSource)> {
        match self.store.reference_snapshot().await {
            Ok(Some(snapshot)) if !snapshot.is_empty() => {
                info!(entries = snapshot.len(), "reference catalog loaded from store snapshot");
                return Ok((ReferenceCatalog::new(snapshot), CatalogSource::Snapshot));
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "reference snapshot unavailable"),
        }

        if let Some(entries) = self.from_file_cache().await {
            info!(entries = entries.len(), "reference catalog loaded from file cache");
            self.seed_snapshot(&entries).await;
            return Ok((ReferenceCatalog::new(entries), CatalogSource::FileCache));
        }

        if let Some(entries) = self.from_network().await {
            info!(entries = entries.len(), "reference catalog loaded from network");
            self.write_file_cache(&entries).await;
            self.seed_snapshot(&entries).await;
            return Ok((ReferenceCatalog::new(entries), CatalogSource::Network));
        }

        warn!("no reference catalog source available, lookups will use placeholders");
        Ok((ReferenceCatalog::empty(), CatalogSource::Empty))
    }

    async fn from_file_cache(&self) -> Option<BTreeMap<String, Descriptor>> {
        let path = self.cache_path.as_ref()?;
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "catalog cache unreadable");
                return None;
            }
        };

        let parsed = serde_json::from_slice::<JsonValue>(&bytes)
            .map_err(LedgerError::from)
            .and_then(|value| parse_catalog(&value));
        match parsed {
            Ok(entries) if !entries.is_empty() => Some(entries),
            Ok(_) => None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "catalog cache invalid");
                None
            }
        }
    }

    async fn from_network(&self) -> Option<BTreeMap<String, Descriptor>> {
        let url = self.url.as_ref()?;
        let result: Result<BTreeMap<String, Descriptor>> = async {
            let response = self.client.get(url).send().await?.error_for_status()?;
            let value: JsonValue = response.json().await?;
            parse_catalog(&value)
        }
        .await;

        match result {
            Ok(entries) if !entries.is_empty() => Some(entries),
            Ok(_) => None,
            Err(err) => {
                warn!(url = %url, error = %err, "catalog download failed");
                None
            }
        }
    }

    async fn write_file_cache(&self, entries: &BTreeMap<String, Descriptor>) {
        let Some(path) = self.cache_path.as_ref() else {
            return;
        };
        let written = match serde_json::to_vec_pretty(entries) {
            Ok(bytes) => atomic_write(path, &bytes).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = written {
            warn!(path = %path.display(), error = %err, "catalog cache not written");
        }
    }

    async fn seed_snapshot(&self, entries: &BTreeMap<String, Descriptor>) {
        if let Err(err) = self.store.save_reference_snapshot(entries.clone()).await {
            warn!(error = %err, "reference snapshot not saved");
        }
    }
}

/// Accepts either `{ "<id>": { "name": .. } }` or `[{ "id": .., "name": .. }]`.
pub fn parse_catalog(value: &JsonValue) -> Result<BTreeMap<String, Descriptor>> {
    match value {
        JsonValue::Object(map) => Ok(map
            .iter()
            .map(|(id, entry)| (id.clone(), Descriptor::from_entry(id, entry)))
            .collect()),
        JsonValue::Array(items) => {
            let mut entries = BTreeMap::new();
            for item in items {
                let id = match item.get("id") {
                    Some(JsonValue::String(id)) => id.clone(),
                    Some(JsonValue::Number(id)) => id.to_string(),
                    _ => continue,
                };
                entries.insert(id.clone(), Descriptor::from_entry(&id, item));
            }
            Ok(entries)
        }
        _ => Err(LedgerError::ParseError(
            "catalog must be a JSON object or array".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_lookup_falls_back_to_placeholder() {
        let catalog = ReferenceCatalog::new([("1".to_string(), Descriptor::new("1", "Ember Fox"))]);
        assert_eq!(catalog.lookup("1").name, "Ember Fox");
        assert_eq!(catalog.lookup("2"), Descriptor::placeholder("2"));
        assert_eq!(
            catalog
                .lookup_all(&["2".to_string(), "1".to_string()])
                .iter()
                .map(|d| d.name.as_str())
                .collect::<Vec<_>>(),
            vec!["unknown(2)", "Ember Fox"]
        );
    }

    #[test]
    fn test_parse_catalog_shapes() {
        let object = parse_catalog(&json!({ "1": { "name": "Fox" }, "2": {} })).unwrap();
        assert_eq!(object["1"].name, "Fox");
        assert_eq!(object["2"].name, "unknown(2)");

        let array = parse_catalog(&json!([{ "id": 3, "name": "Crab" }, { "name": "no id" }])).unwrap();
        assert_eq!(array.len(), 1);
        assert_eq!(array["3"].name, "Crab");

        assert!(parse_catalog(&json!("nope")).is_err());
    }

    #[tokio::test]
    async fn test_load_prefers_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = PersistentStore::open(dir.path().join("store.json"));
        let mut snapshot = BTreeMap::new();
        snapshot.insert("1".to_string(), Descriptor::new("1", "From snapshot"));
        store.save_reference_snapshot(snapshot).await.unwrap();

        let cache = dir.path().join("catalog.json");
        std::fs::write(&cache, r#"{ "1": { "name": "From cache" } }"#).unwrap();

        let config = LedgerConfig::new("http://x").catalog_cache_path(&cache);
        let (catalog, source) = CatalogLoader::new(&store, &config).unwrap().load().await.unwrap();
        assert_eq!(source, CatalogSource::Snapshot);
        assert_eq!(catalog.lookup("1").name, "From snapshot");
    }

    #[tokio::test]
    async fn test_load_from_file_cache_seeds_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = PersistentStore::open(dir.path().join("store.json"));
        let cache = dir.path().join("catalog.json");
        std::fs::write(&cache, r#"[{ "id": "7", "name": "Moss Toad" }]"#).unwrap();

        let config = LedgerConfig::new("http://x").catalog_cache_path(&cache);
        let (catalog, source) = CatalogLoader::new(&store, &config).unwrap().load().await.unwrap();
        assert_eq!(source, CatalogSource::FileCache);
        assert_eq!(catalog.lookup("7").name, "Moss Toad");

        let snapshot = store.reference_snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot["7"].name, "Moss Toad");
    }

    #[tokio::test]
    async fn test_load_with_no_sources_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = PersistentStore::open(dir.path().join("store.json"));
        let config = LedgerConfig::new("http://x");
        let (catalog, source) = CatalogLoader::new(&store, &config).unwrap().load().await.unwrap();
        assert_eq!(source, CatalogSource::Empty);
        assert!(catalog.is_empty());
    }
}
