pub mod client;
pub mod envelope;
pub mod retry;

pub use client::{OwnershipSource, RemoteFetcher, USER_ID_PARAM};
pub use envelope::{parse_body, strip_envelope};
pub use retry::{retry_with_backoff, retry_with_policy};
