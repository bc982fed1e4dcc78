pub mod error;
pub mod payload;
pub mod types;

pub use error::{LedgerError, Result};
pub use payload::RawPayload;
pub use types::{
    Descriptor, FetchOutcome, MergeStats, OwnershipRecord, SourceTier, StoreStats, UserResult,
};
