//! Manifest document types
//!
//! These serialize to the camelCase `manifest.json` layout read back by
//! incremental runs and by `verify`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Run counters persisted alongside the asset table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stats {
    pub total_assets: u64,
    pub total_size: u64,
    pub crawled_pages: u64,
    pub skipped_assets: u64,
    pub failed_assets: u64,
    /// Pages that errored or were refused by the SSRF policy
    pub failed_pages: u64,
    /// Milliseconds spent in successful asset downloads
    pub total_download_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Stats {
    /// Mean download time per captured asset in milliseconds
    #[must_use]
    pub fn average_latency_ms(&self) -> f64 {
        if self.total_assets == 0 {
            0.0
        } else {
            self.total_download_time as f64 / self.total_assets as f64
        }
    }

    /// Share of attempted assets that were captured, as a percentage
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let attempted = self.total_assets + self.failed_assets;
        if attempted == 0 {
            100.0
        } else {
            self.total_assets as f64 * 100.0 / attempted as f64
        }
    }
}

/// One captured file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetEntry {
    pub original_url: String,
    pub content_type: String,
    pub size: u64,
    /// `sha256-<hex>` of the bytes on disk
    pub integrity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// Breakpoint name to screenshot path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshots: Option<BTreeMap<String, String>>,
}

impl AssetEntry {
    #[must_use]
    pub fn new(
        original_url: impl Into<String>,
        content_type: impl Into<String>,
        size: u64,
        integrity: impl Into<String>,
    ) -> Self {
        Self {
            original_url: original_url.into(),
            content_type: content_type.into(),
            size,
            integrity: integrity.into(),
            etag: None,
            last_modified: None,
            screenshots: None,
        }
    }

    #[must_use]
    pub fn with_validators(mut self, etag: Option<String>, last_modified: Option<String>) -> Self {
        self.etag = etag;
        self.last_modified = last_modified;
        self
    }
}

/// The persisted `manifest.json` document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub replicated_at: Option<String>,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub stats: Stats,
    #[serde(default)]
    pub assets: BTreeMap<String, AssetEntry>,
    /// Page and asset URLs that failed permanently during the run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_urls: Vec<String>,
}

/// Integrity token for a finished digest
#[must_use]
pub fn integrity_from_digest(hasher: Sha256) -> String {
    format!("sha256-{}", hex::encode(hasher.finalize()))
}

/// Integrity token for an in-memory buffer
#[must_use]
pub fn integrity_of(bytes: &[u8]) -> String {
    integrity_from_digest(Sha256::new_with_prefix(bytes))
}
