//! On-disk artifact store
//!
//! Layout under the store base directory:
//!
//! ```text
//! cache/
//!   node_signatures.json        { "<step>": "<signature>", ... }
//!   datasets_index.json         { "<dataset>": {fingerprint,type,file}, ... }
//!   datasets/<dataset>.json     serialized artifact
//! failures/<step>.json          failure snapshot
//! ```
//!
//! Datasets are written before the indexes so a crash mid-write cannot
//! leave a signature without its artifacts. All cache I/O is non-fatal:
//! failures are logged and execution proceeds.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CacheError;
use crate::value::Value;

/// Index entry for one persisted dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub fingerprint: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub file: String,
}

/// Everything restored by [`ArtifactStore::load_all`].
#[derive(Debug, Default)]
pub struct LoadedCache {
    pub signatures: BTreeMap<String, String>,
    /// (dataset, value, fingerprint)
    pub datasets: Vec<(String, Value, String)>,
}

/// Filesystem-backed artifact persistence.
pub struct ArtifactStore {
    base: PathBuf,
    enabled: bool,
    // Index rewrites are read-modify-write; serialize them.
    io_lock: Mutex<()>,
}

impl ArtifactStore {
    pub fn new(base: impl Into<PathBuf>, enabled: bool) -> ArtifactStore {
        ArtifactStore {
            base: base.into(),
            enabled,
            io_lock: Mutex::new(()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn cache_dir(&self) -> PathBuf {
        self.base.join("cache")
    }

    fn datasets_dir(&self) -> PathBuf {
        self.cache_dir().join("datasets")
    }

    fn signatures_path(&self) -> PathBuf {
        self.cache_dir().join("node_signatures.json")
    }

    fn index_path(&self) -> PathBuf {
        self.cache_dir().join("datasets_index.json")
    }

    fn failures_dir(&self) -> PathBuf {
        self.base.join("failures")
    }

    // ------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------

    /// Restore the signature map and every readable dataset. Unreadable
    /// entries are skipped with a warning; this never fails.
    pub fn load_all(&self) -> LoadedCache {
        let mut loaded = LoadedCache::default();
        if !self.enabled {
            return loaded;
        }

        match self.read_json::<BTreeMap<String, String>>(&self.signatures_path()) {
            Ok(Some(signatures)) => loaded.signatures = signatures,
            Ok(None) => {}
            Err(err) => warn!(error = %err, "signature file unreadable, starting cold"),
        }

        let index = match self.read_json::<BTreeMap<String, DatasetEntry>>(&self.index_path()) {
            Ok(Some(index)) => index,
            Ok(None) => return loaded,
            Err(err) => {
                warn!(error = %err, "dataset index unreadable, starting cold");
                return loaded;
            }
        };

        for (dataset, entry) in index {
            let path = self.cache_dir().join(&entry.file);
            match self.read_json::<Value>(&path) {
                Ok(Some(value)) => {
                    loaded.datasets.push((dataset, value, entry.fingerprint));
                }
                Ok(None) => {}
                Err(err) => warn!(%dataset, error = %err, "cached dataset unreadable, skipped"),
            }
        }

        if !loaded.datasets.is_empty() || !loaded.signatures.is_empty() {
            info!(
                datasets = loaded.datasets.len(),
                signatures = loaded.signatures.len(),
                "persistent cache loaded"
            );
        }
        loaded
    }

    // ------------------------------------------------------------------
    // Record
    // ------------------------------------------------------------------

    /// Persist a step's produced datasets and the current signature map.
    /// Datasets are written first, then both indexes.
    pub fn record(
        &self,
        signatures: &BTreeMap<String, String>,
        produced: &[(String, Value, String)],
    ) {
        if !self.enabled {
            return;
        }
        let _guard = self.io_lock.lock();
        if let Err(err) = self.record_inner(signatures, produced) {
            warn!(error = %err, "cache persistence failed (ignored)");
        }
    }

    fn record_inner(
        &self,
        signatures: &BTreeMap<String, String>,
        produced: &[(String, Value, String)],
    ) -> Result<(), CacheError> {
        fs::create_dir_all(self.datasets_dir()).map_err(|e| CacheError::Io {
            operation: "mkdir",
            path: self.datasets_dir().display().to_string(),
            source: e,
        })?;

        let mut index = self
            .read_json::<BTreeMap<String, DatasetEntry>>(&self.index_path())
            .unwrap_or_default()
            .unwrap_or_default();

        for (dataset, value, fingerprint) in produced {
            if value.is_null() {
                continue;
            }
            let file_name = format!("{dataset}.json");
            let path = self.datasets_dir().join(&file_name);
            self.write_json(&path, value)?;
            index.insert(
                dataset.clone(),
                DatasetEntry {
                    fingerprint: fingerprint.clone(),
                    type_tag: value.type_tag().to_string(),
                    file: format!("datasets/{file_name}"),
                },
            );
        }

        self.write_json(&self.signatures_path(), signatures)?;
        self.write_json(&self.index_path(), &index)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Delete the cache directory.
    pub fn clear(&self) {
        let _guard = self.io_lock.lock();
        let dir = self.cache_dir();
        if dir.is_dir() {
            if let Err(err) = fs::remove_dir_all(&dir) {
                warn!(path = %dir.display(), error = %err, "cache clear failed");
            }
        }
    }

    /// Age of the persisted signature file; `None` when nothing was
    /// persisted yet. Used for per-step cache TTL expiry.
    pub fn signature_age(&self) -> Option<Duration> {
        let meta = fs::metadata(self.signatures_path()).ok()?;
        let modified = meta.modified().ok()?;
        modified.elapsed().ok()
    }

    /// Write a post-mortem snapshot for a failed step.
    pub fn write_failure_snapshot(&self, step: &str, snapshot: &Value) {
        let dir = self.failures_dir();
        if let Err(err) = fs::create_dir_all(&dir) {
            warn!(error = %err, "failure snapshot dir not writable");
            return;
        }
        let path = dir.join(format!("{step}.json"));
        if let Err(err) = self.write_json(&path, snapshot) {
            warn!(error = %err, "failure snapshot not written");
        }
    }

    // ------------------------------------------------------------------
    // JSON helpers
    // ------------------------------------------------------------------

    fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<Option<T>, CacheError> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path).map_err(|e| CacheError::Io {
            operation: "read",
            path: path.display().to_string(),
            source: e,
        })?;
        let parsed = serde_json::from_str(&text).map_err(|e| CacheError::Serde {
            operation: "parse",
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Some(parsed))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), CacheError> {
        let text = serde_json::to_string_pretty(value).map_err(|e| CacheError::Serde {
            operation: "serialize",
            path: path.display().to_string(),
            source: e,
        })?;
        fs::write(path, text).map_err(|e| CacheError::Io {
            operation: "write",
            path: path.display().to_string(),
            source: e,
        })
    }
}
