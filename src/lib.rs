// ============================================================================
// PetLedger Library
// ============================================================================

pub mod catalog;
pub mod config;
pub mod core;
pub mod fetch;
pub mod ledger;
pub mod resolver;
pub mod store;

// Re-export main types for convenience
pub use catalog::{CatalogLoader, CatalogSource, ReferenceCatalog};
pub use config::{LedgerConfig, RetryPolicy, WavePolicy};
pub use core::{
    Descriptor, FetchOutcome, LedgerError, MergeStats, OwnershipRecord, RawPayload, Result,
    SourceTier, StoreStats, UserResult,
};
pub use fetch::{OwnershipSource, RemoteFetcher};
pub use resolver::{BatchResolver, ResolveReport};
pub use store::PersistentStore;

/// Ownership ledger with store, catalog and upstream client wired together.
///
/// This is the recommended entry point for applications.
///
/// # Examples
///
/// ```no_run
/// use petledger::{LedgerConfig, PetLedger};
///
/// # async fn run() -> petledger::Result<()> {
/// let config = LedgerConfig::new("https://upstream.example/query")
///     .store_path("data/ownership.json");
/// let ledger = PetLedger::open(config).await?;
///
/// let ids = vec!["10001".to_string(), "10002".to_string()];
/// for result in ledger.resolve(&ids).await? {
///     println!("{} owns {:?} ({:?})", result.user_id, result.ownership_ids, result.source);
/// }
/// # Ok(())
/// # }
/// ```
pub use ledger::PetLedger;
