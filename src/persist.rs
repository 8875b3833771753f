//! Snapshot Persistence
//!
//! Cache entries and usage history written to a JSON file on shutdown and
//! read back on start.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::CacheEntry;
use crate::error::PersistError;
use crate::usage::UsageRecord;

// == Snapshot ==
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Unix milliseconds at which the snapshot was taken
    pub saved_at: u64,
    /// Entries keyed by cache key
    pub cache: BTreeMap<String, CacheEntry>,
    /// Usage history, newest first
    pub usage: Vec<UsageRecord>,
}

impl Snapshot {
    /// Drops entries already stale at `now_ms`. Returns how many were dropped.
    pub fn drop_expired(&mut self, now_ms: u64) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, entry| !entry.is_expired_at(now_ms));
        before - self.cache.len()
    }
}

/// Writes `snapshot` to `path`, replacing any previous file.
///
/// The JSON goes to a sibling temp file first and is renamed into place.
pub async fn save(path: &Path, snapshot: &Snapshot) -> Result<(), PersistError> {
    let json = serde_json::to_vec_pretty(snapshot)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;

    info!(
        path = %path.display(),
        entries = snapshot.cache.len(),
        usage = snapshot.usage.len(),
        "Snapshot saved"
    );
    Ok(())
}

/// Reads the snapshot at `path`. A missing file is `Ok(None)`.
pub async fn load(path: &Path) -> Result<Option<Snapshot>, PersistError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}
