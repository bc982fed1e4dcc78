use crate::core::{LedgerError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_STORE_PATH: &str = "data/ownership.json";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
pub const DEFAULT_ACCEPT: &str = "application/json, text/javascript, */*; q=0.01";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Retry behaviour for a single upstream query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Linear backoff step in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound of the uniform jitter added to each delay.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            jitter_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * retry + jitter`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let linear = self.base_delay_ms.saturating_mul(u64::from(retry));
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        Duration::from_millis(linear.saturating_add(jitter))
    }
}

/// Scheduling of network fetches in fixed-size waves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WavePolicy {
    /// Fetches running concurrently within one wave.
    pub wave_size: usize,
    pub min_pause_ms: u64,
    pub max_pause_ms: u64,
}

impl Default for WavePolicy {
    fn default() -> Self {
        Self {
            wave_size: 50,
            min_pause_ms: 200,
            max_pause_ms: 500,
        }
    }
}

impl WavePolicy {
    /// Randomized pause inserted between two waves.
    pub fn pause(&self) -> Duration {
        let low = self.min_pause_ms.min(self.max_pause_ms);
        let high = self.max_pause_ms.max(low);
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }
}

/// Ledger configuration
///
/// Every field has a default, so a JSON config file only needs the keys it
/// overrides. The upstream `endpoint` has no usable default and must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Path of the persistent ownership document
    pub store_path: PathBuf,

    /// Per-user query URL; the user id is sent as the `uid` query parameter
    pub endpoint: String,

    /// Optional network source for the reference catalog
    pub catalog_url: Option<String>,

    /// Optional local file cache for the reference catalog
    pub catalog_cache_path: Option<PathBuf>,

    /// Per-request timeout
    pub request_timeout_ms: u64,

    pub retry: RetryPolicy,

    pub waves: WavePolicy,

    /// Age after which a record is considered stale
    pub stale_after_hours: u64,

    pub user_agent: String,

    pub referer: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            endpoint: String::new(),
            catalog_url: None,
            catalog_cache_path: None,
            request_timeout_ms: 15_000,
            retry: RetryPolicy::default(),
            waves: WavePolicy::default(),
            stale_after_hours: 24,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: String::new(),
        }
    }
}

impl LedgerConfig {
    /// Create a configuration for the given upstream endpoint
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            LedgerError::Config(format!(
                "Failed to read config '{}': {}",
                path.display(),
                err
            ))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            LedgerError::Config(format!(
                "Failed to parse config '{}': {}",
                path.display(),
                err
            ))
        })
    }

    /// Set the store path
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    /// Set the upstream endpoint
    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// Set the catalog network source
    pub fn catalog_url(mut self, url: &str) -> Self {
        self.catalog_url = Some(url.to_string());
        self
    }

    /// Set the catalog file cache
    pub fn catalog_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_cache_path = Some(path.into());
        self
    }

    /// Set the per-request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the wave policy
    pub fn waves(mut self, waves: WavePolicy) -> Self {
        self.waves = waves;
        self
    }

    /// Set the staleness threshold in hours
    pub fn stale_after_hours(mut self, hours: u64) -> Self {
        self.stale_after_hours = hours;
        self
    }

    /// Set the referer header sent upstream
    pub fn referer(mut self, referer: &str) -> Self {
        self.referer = referer.to_string();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        i64::try_from(self.stale_after_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(LedgerError::Config("endpoint cannot be empty".to_string()));
        }

        if self.retry.max_attempts == 0 {
            return Err(LedgerError::Config("retry.max_attempts must be > 0".to_string()));
        }

        if self.waves.wave_size == 0 {
            return Err(LedgerError::Config("waves.wave_size must be > 0".to_string()));
        }

        if self.waves.min_pause_ms > self.waves.max_pause_ms {
            return Err(LedgerError::Config(
                "waves.min_pause_ms cannot exceed waves.max_pause_ms".to_string(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(LedgerError::Config("request_timeout_ms must be > 0".to_string()));
        }

        Ok(())
    }
}
