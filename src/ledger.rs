use crate::catalog::{CatalogLoader, CatalogSource, ReferenceCatalog};
use crate::config::LedgerConfig;
use crate::core::{Result, UserResult};
use crate::fetch::{OwnershipSource, RemoteFetcher};
use crate::resolver::{BatchResolver, ResolveReport};
use crate::store::PersistentStore;
use std::sync::Arc;
use tracing::info;

/// Process-wide context: store, catalog and resolver composed once at startup.
///
/// The owner decides its lifetime; nothing here is global.
pub struct PetLedger {
    config: LedgerConfig,
    store: Arc<PersistentStore>,
    catalog: Arc<ReferenceCatalog>,
    catalog_source: CatalogSource,
    resolver: BatchResolver,
}

impl PetLedger {
    /// Opens the ledger with the HTTP upstream described by `config`.
    pub async fn open(config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = RemoteFetcher::new(&config)?;
        Self::open_with_source(config, Arc::new(fetcher)).await
    }

    /// Opens the ledger with a caller-supplied ownership source.
    pub async fn open_with_source(
        config: LedgerConfig,
        source: Arc<dyn OwnershipSource>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(PersistentStore::open(config.store_path.clone()));
        let (catalog, catalog_source) = CatalogLoader::new(&store, &config)?.load().await?;
        let catalog = Arc::new(catalog);

        info!(
            store = %store.path().display(),
            catalog_entries = catalog.len(),
            catalog_source = ?catalog_source,
            "ledger opened"
        );

        let resolver = BatchResolver::new(
            store.clone(),
            catalog.clone(),
            source,
            config.waves.clone(),
        );

        Ok(Self {
            config,
            store,
            catalog,
            catalog_source,
            resolver,
        })
    }

    pub async fn resolve(&self, ids: &[String]) -> Result<Vec<UserResult>> {
        self.resolver.resolve(ids).await
    }

    pub async fn resolve_with_stats(&self, ids: &[String]) -> Result<ResolveReport> {
        self.resolver.resolve_with_stats(ids).await
    }

    /// Re-fetches records older than the configured staleness threshold.
    pub async fn refresh_stale(&self) -> Result<ResolveReport> {
        self.resolver.refresh_stale(self.config.stale_after()).await
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    pub fn catalog(&self) -> &ReferenceCatalog {
        &self.catalog
    }

    pub fn catalog_source(&self) -> CatalogSource {
        self.catalog_source
    }
}
