//! Live manifest with atomic persistence
//!
//! The store is shared by every page and asset task of a run. Entries are
//! keyed by local path; a path counts as captured once this run has either
//! written it or confirmed it unchanged with a 304.

use dashmap::{DashMap, DashSet};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::{AssetEntry, Manifest, Stats};
use crate::crawl_engine::crawl_types::{ReplicaError, ReplicaResult};
use crate::utils::constants::MANIFEST_FILENAME;

pub struct ManifestStore {
    source_url: RwLock<String>,
    assets: DashMap<String, AssetEntry>,
    /// Entries carried over from a prior run, used for conditional requests
    previous: DashMap<String, AssetEntry>,
    captured: DashSet<String>,
    failed: DashSet<String>,
    stats: Mutex<Stats>,
}

impl ManifestStore {
    #[must_use]
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: RwLock::new(source_url.into()),
            assets: DashMap::new(),
            previous: DashMap::new(),
            captured: DashSet::new(),
            failed: DashSet::new(),
            stats: Mutex::new(Stats::default()),
        }
    }

    /// Path of the manifest inside `output_dir`
    #[must_use]
    pub fn manifest_path(output_dir: &Path) -> PathBuf {
        output_dir.join(MANIFEST_FILENAME)
    }

    /// Strictly read and parse `manifest.json`
    pub async fn read(output_dir: &Path) -> ReplicaResult<Manifest> {
        let path = Self::manifest_path(output_dir);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReplicaError::ManifestNotFound(path));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&contents).map_err(|e| ReplicaError::ManifestCorrupt {
            path,
            reason: e.to_string(),
        })
    }

    /// Resume from a prior manifest, falling back to an empty one
    ///
    /// Carried-over entries stay in the table so they survive the next save,
    /// and their validators drive conditional requests. Counters start fresh.
    pub async fn load(output_dir: &Path, source_url: impl Into<String>) -> Self {
        let store = Self::new(source_url);
        match Self::read(output_dir).await {
            Ok(manifest) => {
                for (path, entry) in manifest.assets {
                    store.previous.insert(path.clone(), entry.clone());
                    store.assets.insert(path, entry);
                }
                info!("Loaded manifest with {} assets", store.assets.len());
            }
            Err(ReplicaError::ManifestNotFound(path)) => {
                debug!("No prior manifest at {}", path.display());
            }
            Err(e) => {
                warn!("Ignoring unreadable manifest: {e}");
            }
        }
        store
    }

    /// Whether this run already wrote or confirmed `local_path`
    #[must_use]
    pub fn is_captured(&self, local_path: &str) -> bool {
        self.captured.contains(local_path)
    }

    /// Entry from the prior run, if any
    #[must_use]
    pub fn previous(&self, local_path: &str) -> Option<AssetEntry> {
        self.previous.get(local_path).map(|e| e.value().clone())
    }

    /// Every carried-over `(local path, entry)` pair
    #[must_use]
    pub fn previous_entries(&self) -> Vec<(String, AssetEntry)> {
        self.previous
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    #[must_use]
    pub fn entry(&self, local_path: &str) -> Option<AssetEntry> {
        self.assets.get(local_path).map(|e| e.value().clone())
    }

    /// Record a freshly written file, replacing any carried-over entry
    pub fn record(&self, local_path: impl Into<String>, entry: AssetEntry) {
        let local_path = local_path.into();
        self.captured.insert(local_path.clone());
        self.assets.insert(local_path, entry);
    }

    /// Keep a carried-over entry after the server answered 304
    pub fn mark_unchanged(&self, local_path: &str) {
        self.captured.insert(local_path.to_string());
    }

    /// Drop a carried-over entry whose URL failed this run
    ///
    /// Entries written or confirmed by this run are kept. Returns whether an
    /// entry was removed.
    pub fn discard_stale(&self, local_path: &str) -> bool {
        if self.captured.contains(local_path) {
            return false;
        }
        self.assets.remove(local_path).is_some()
    }

    /// Remember a URL that failed permanently; returns false if already known
    pub fn mark_failed(&self, url: impl Into<String>) -> bool {
        self.failed.insert(url.into())
    }

    /// Attach a screenshot path to the page entry at `page_path`
    ///
    /// Returns false when no such page entry exists.
    pub fn attach_screenshot(&self, page_path: &str, breakpoint: &str, shot_path: &str) -> bool {
        match self.assets.get_mut(page_path) {
            Some(mut entry) => {
                entry
                    .screenshots
                    .get_or_insert_with(BTreeMap::new)
                    .insert(breakpoint.to_string(), shot_path.to_string());
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Mutate the run counters under the stats lock
    pub fn update_stats<R>(&self, f: impl FnOnce(&mut Stats) -> R) -> R {
        f(&mut self.stats.lock())
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        self.stats.lock().clone()
    }

    pub fn set_source_url(&self, source_url: impl Into<String>) {
        *self.source_url.write() = source_url.into();
    }

    /// Point-in-time manifest document stamped with the current time
    #[must_use]
    pub fn snapshot(&self) -> Manifest {
        Manifest {
            replicated_at: Some(
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            ),
            source_url: self.source_url.read().clone(),
            stats: self.stats(),
            assets: self
                .assets
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            failed_urls: {
                let mut urls: Vec<String> = self.failed.iter().map(|u| u.key().clone()).collect();
                urls.sort();
                urls
            },
        }
    }

    /// Write the manifest to `{output_dir}/manifest.json`
    ///
    /// The document goes to a temp file that is synced and renamed over the
    /// old manifest, so readers never see a partial file.
    pub async fn save(&self, output_dir: &Path) -> ReplicaResult<PathBuf> {
        let manifest_path = Self::manifest_path(output_dir);
        fs::create_dir_all(output_dir).await?;

        let json = serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| ReplicaError::Fatal(format!("Failed to serialize manifest: {e}")))?;

        let temp_path = manifest_path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &manifest_path).await?;

        info!(
            "Wrote {} ({} entries)",
            manifest_path.display(),
            self.assets.len()
        );
        Ok(manifest_path)
    }
}
