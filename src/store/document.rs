//! On-disk JSON document holding every ownership record.

use crate::core::{Descriptor, LedgerError, OwnershipRecord, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const STORE_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDocument {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub users: BTreeMap<String, OwnershipRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_snapshot: Option<BTreeMap<String, Descriptor>>,
}

impl StoreDocument {
    pub fn empty() -> Self {
        Self {
            version: STORE_FORMAT_VERSION.to_string(),
            last_updated: Utc::now(),
            users: BTreeMap::new(),
            reference_snapshot: None,
        }
    }

    /// Loads the document at `path`; a missing file is an empty document.
    pub async fn load(path: &Path) -> Result<Self> {
        Ok(Self::load_existing(path).await?.unwrap_or_else(Self::empty))
    }

    /// Like [`StoreDocument::load`], but `None` when the file does not exist.
    pub async fn load_existing(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(LedgerError::Persistence(format!(
                    "Failed to read store '{}': {}",
                    path.display(),
                    err
                )));
            }
        };

        serde_json::from_slice(&bytes).map(Some).map_err(|err| {
            LedgerError::Persistence(format!(
                "Failed to decode store '{}': {}",
                path.display(),
                err
            ))
        })
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|err| {
            LedgerError::Persistence(format!("Failed to encode store document: {}", err))
        })?;
        atomic_write(path, &bytes).await
    }
}

/// Writes `bytes` next to `path` and renames over it, so readers never see a
/// half-written document.
pub(crate) async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(|err| {
            LedgerError::Persistence(format!(
                "Failed to create parent directory '{}': {}",
                parent.display(),
                err
            ))
        })?;
    }

    let tmp = temp_path(path)?;
    fs::write(&tmp, bytes).await.map_err(|err| {
        LedgerError::Persistence(format!(
            "Failed to write temp file '{}': {}",
            tmp.display(),
            err
        ))
    })?;

    fs::rename(&tmp, path).await.map_err(|err| {
        LedgerError::Persistence(format!(
            "Failed to rename temp file '{}' -> '{}': {}",
            tmp.display(),
            path.display(),
            err
        ))
    })?;
    Ok(())
}

/// `<file name>.tmp` in the same directory. Keeping the whole file name stops
/// `x.json` and `x.cache` from sharing a temp file.
fn temp_path(path: &Path) -> Result<PathBuf> {
    let Some(name) = path.file_name() else {
        return Err(LedgerError::Persistence(format!(
            "'{}' does not name a file",
            path.display()
        )));
    };
    let mut tmp_name = name.to_os_string();
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}
