//! Resource Registry: resident set, swarm-acquired set and usage counters.
//!
//! The resident set is never stored: it is asked of the [`PackageManager`]
//! every time. What the registry does persist is a small JSON record:
//!
//! ```json
//! { "downloaded_by_swarm": ["tinyllama"], "usage": { "tinyllama": 4 } }
//! ```
//!
//! Every mutating call rewrites the whole record. There is no cross-process
//! lock, so two runs mutating the same file concurrently can lose updates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::{base_name, PackageManager};
use crate::catalog::BackendId;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry I/O on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry record at {} is not valid JSON: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// The persisted part of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    /// Ids this system pulled, in acquisition order. No duplicates.
    #[serde(default)]
    pub downloaded_by_swarm: Vec<BackendId>,
    /// Selection counters. Never decremented.
    #[serde(default)]
    pub usage: BTreeMap<BackendId, u64>,
}

/// Snapshot of the ids the package manager reports as resident.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResidentSet {
    ids: Vec<BackendId>,
}

impl ResidentSet {
    pub fn new(ids: Vec<BackendId>) -> Self {
        Self { ids }
    }

    /// Match by id, falling back to the base name so tag variants match.
    pub fn contains(&self, id: &str) -> bool {
        if self.ids.iter().any(|r| r == id) {
            return true;
        }
        let wanted = base_name(id);
        self.ids.iter().any(|r| base_name(r) == wanted)
    }

    /// Match by id, treating an untagged id as `:latest`.
    ///
    /// Stricter than [`contains`](Self::contains): `qwen2.5-coder:3b` does not
    /// satisfy `qwen2.5-coder:1.5b`.
    pub fn contains_exact(&self, id: &str) -> bool {
        let wanted = normalize_tag(id);
        self.ids.iter().any(|r| normalize_tag(r) == wanted)
    }

    pub fn ids(&self) -> &[BackendId] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn normalize_tag(id: &str) -> String {
    if id.contains(':') {
        id.to_string()
    } else {
        format!("{id}:latest")
    }
}

/// Registry bound to one storage path and one package manager.
///
/// Shared by reference (`Arc<ResourceRegistry>`) between the selector,
/// acquirer and evictor; it is the only owner of the usage/eviction state.
pub struct ResourceRegistry {
    path: PathBuf,
    packages: Arc<dyn PackageManager>,
    record: Mutex<RegistryRecord>,
}

impl ResourceRegistry {
    /// Open (or start) the record at `path`.
    ///
    /// A corrupt record is logged and replaced by an empty one, mirroring
    /// how a fresh install behaves.
    pub fn open(path: impl Into<PathBuf>, packages: Arc<dyn PackageManager>) -> Self {
        let path = path.into();
        let record = match load_record(&path) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Starting with an empty registry record");
                RegistryRecord::default()
            }
        };
        Self {
            path,
            packages,
            record: Mutex::new(record),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn packages(&self) -> &Arc<dyn PackageManager> {
        &self.packages
    }

    /// Ask the package manager what is resident right now.
    ///
    /// A failing package manager reads as "nothing resident".
    pub async fn resident(&self) -> ResidentSet {
        match self.packages.list().await {
            Ok(ids) => ResidentSet::new(ids),
            Err(e) => {
                warn!(error = %e, "Could not list resident backends");
                ResidentSet::default()
            }
        }
    }

    pub async fn is_resident(&self, id: &str) -> bool {
        self.resident().await.contains(id)
    }

    /// Record that this system pulled `id`. Idempotent.
    pub fn mark_acquired(&self, id: &str) -> RegistryResult<()> {
        let mut record = self.lock();
        if record.downloaded_by_swarm.iter().any(|m| m == id) {
            return Ok(());
        }
        record.downloaded_by_swarm.push(id.to_string());
        debug!(backend = id, "Marked as swarm-acquired");
        save_record(&self.path, &record)
    }

    /// Drop `id` from the swarm-acquired set after it was removed from the host.
    ///
    /// Its usage counter is kept.
    pub fn forget(&self, id: &str) -> RegistryResult<()> {
        let mut record = self.lock();
        let before = record.downloaded_by_swarm.len();
        record.downloaded_by_swarm.retain(|m| m != id);
        if record.downloaded_by_swarm.len() == before {
            return Ok(());
        }
        save_record(&self.path, &record)
    }

    pub fn is_swarm_acquired(&self, id: &str) -> bool {
        self.lock().downloaded_by_swarm.iter().any(|m| m == id)
    }

    pub fn swarm_acquired(&self) -> Vec<BackendId> {
        self.lock().downloaded_by_swarm.clone()
    }

    /// Bump the selection counter for `id`.
    pub fn record_usage(&self, id: &str) -> RegistryResult<()> {
        let mut record = self.lock();
        let count = record.usage.entry(id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        save_record(&self.path, &record)
    }

    pub fn usage_count(&self, id: &str) -> u64 {
        self.lock().usage.get(id).copied().unwrap_or(0)
    }

    /// Least-used swarm-acquired id not in `excluding`.
    ///
    /// Ties go to the earliest acquisition.
    pub fn least_used(&self, excluding: &[BackendId]) -> Option<BackendId> {
        let record = self.lock();
        let mut best: Option<(&BackendId, u64)> = None;
        for id in &record.downloaded_by_swarm {
            if excluding.contains(id) {
                continue;
            }
            let count = record.usage.get(id).copied().unwrap_or(0);
            if best.map_or(true, |(_, c)| count < c) {
                best = Some((id, count));
            }
        }
        best.map(|(id, _)| id.clone())
    }

    /// Copy of the persisted record.
    pub fn snapshot(&self) -> RegistryRecord {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryRecord> {
        // Updates are single in-place mutations; a poisoned record is still whole.
        self.record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn load_record(path: &Path) -> RegistryResult<RegistryRecord> {
    if !path.exists() {
        return Ok(RegistryRecord::default());
    }
    let json = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&json).map_err(|source| RegistryError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn save_record(path: &Path, record: &RegistryRecord) -> RegistryResult<()> {
    let io_err = |source: std::io::Error| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| io_err(std::io::Error::other(e)))?;
    std::fs::write(path, json).map_err(io_err)
}
