//! Asset capture: schedule, fetch, transform, persist, record
//!
//! `capture` is idempotent per URL. Accepted URLs run on their hostname's
//! worker pool inside that hostname's circuit breaker, with truncated
//! exponential backoff between attempts. The eventual state of every URL is
//! a manifest entry or membership in the failed set, never both.

use dashmap::{DashMap, DashSet};
use futures::StreamExt;
use log::{debug, error, info, warn};
use rand::Rng;
use reqwest::Client;
use reqwest::header::{
    CONTENT_TYPE, ETAG, HeaderName, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use super::transforms::{Transform, is_compressible};
use super::writer::StagedWriter;
use crate::config::{CompressionPolicy, ReplicationOptions};
use crate::crawl_engine::crawl_types::{ReplicaError, ReplicaResult};
use crate::crawl_engine::domain_scheduler::DomainScheduler;
use crate::crawl_events::{ReplicationEvent, ReplicationEventBus};
use crate::manifest::{AssetEntry, ManifestStore};
use crate::security::SecurityGuard;
use crate::utils::constants::MAX_RETRY_DELAY_MS;
use crate::utils::{hostname_of, local_path_for_url, strip_fragment};

const MAX_JITTER_MS: u64 = 1000;
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// How one successful attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Captured { local_path: String, size: u64 },
    /// 304 against the validators of a prior run
    NotModified,
}

/// Shared state every asset task needs
pub struct AssetPipeline {
    options: Arc<ReplicationOptions>,
    client: Client,
    security: Arc<SecurityGuard>,
    scheduler: Arc<DomainScheduler>,
    manifest: Arc<ManifestStore>,
    url_table: Arc<DashMap<String, String>>,
    allowed_hosts: HashSet<String>,
    pending: DashSet<String>,
    failed: DashSet<String>,
    events: Option<ReplicationEventBus>,
}

impl AssetPipeline {
    /// Build a pipeline for a crawl of `base_host`
    ///
    /// Assets are only fetched from `base_host` and the configured extra
    /// allowed domains.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        base_host: &str,
        options: Arc<ReplicationOptions>,
        client: Client,
        security: Arc<SecurityGuard>,
        scheduler: Arc<DomainScheduler>,
        manifest: Arc<ManifestStore>,
        url_table: Arc<DashMap<String, String>>,
        events: Option<ReplicationEventBus>,
    ) -> Self {
        let mut allowed_hosts: HashSet<String> = options.allowed_domains().iter().cloned().collect();
        allowed_hosts.insert(base_host.to_ascii_lowercase());
        Self {
            options,
            client,
            security,
            scheduler,
            manifest,
            url_table,
            allowed_hosts,
            pending: DashSet::new(),
            failed: DashSet::new(),
            events,
        }
    }

    /// Schedule `url` for capture; returns whether a new task was queued
    ///
    /// No-op when the URL is already captured this run, has failed, is in
    /// flight, or lives on a host outside the allow-list.
    pub fn capture(self: &Arc<Self>, url: &Url) -> bool {
        let url = strip_fragment(url.clone());
        let key = url.to_string();
        let local = local_path_for_url(&url);

        if self.manifest.is_captured(&local)
            || self.manifest.is_captured(&format!("{local}.br"))
            || self.failed.contains(&key)
        {
            return false;
        }

        let Some(host) = hostname_of(&url) else {
            return false;
        };
        if !self.allowed_hosts.contains(&host) {
            debug!("Blocked by domain allowlist: {url}");
            return false;
        }

        // insert doubles as the atomic check for in-flight URLs
        if !self.pending.insert(key.clone()) {
            return false;
        }

        let pipeline = Arc::clone(self);
        self.scheduler.queue_for(&host).submit(async move {
            pipeline.run(url, key, local, host).await;
        });
        true
    }

    /// Whether `url` lives on a host this run may fetch assets from
    #[must_use]
    pub fn in_scope(&self, url: &Url) -> bool {
        hostname_of(url).is_some_and(|host| self.allowed_hosts.contains(&host))
    }

    /// Asset URLs currently queued or in flight
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    #[must_use]
    pub fn is_failed(&self, url: &Url) -> bool {
        self.failed.contains(strip_fragment(url.clone()).as_str())
    }

    async fn run(self: Arc<Self>, url: Url, key: String, local: String, host: String) {
        let breaker = self.scheduler.breaker_for(&host);
        let max_retries = self.options.max_retries();
        let mut attempt: u32 = 0;

        loop {
            match breaker.execute(|| self.fetch_once(&url, &local)).await {
                Ok(FetchOutcome::Captured { local_path, size }) => {
                    info!("Asset captured: {local_path} ({:.2} KB)", size as f64 / 1024.0);
                    self.publish(ReplicationEvent::AssetCaptured {
                        url: key.clone(),
                        local_path,
                        size,
                        timestamp: chrono::Utc::now(),
                    });
                    break;
                }
                Ok(FetchOutcome::NotModified) => {
                    info!("Asset not modified (304): {url}");
                    self.publish(ReplicationEvent::AssetSkipped {
                        url: key.clone(),
                        timestamp: chrono::Utc::now(),
                    });
                    break;
                }
                Err(e) => {
                    warn!(
                        "Asset download failed (attempt {}/{}): {url}: {e}",
                        attempt + 1,
                        max_retries + 1
                    );
                    if e.is_terminal() || attempt >= max_retries {
                        error!("Asset failed after {} attempts: {url}", attempt + 1);
                        for stale in [local.clone(), format!("{local}.br")] {
                            if self.manifest.discard_stale(&stale) {
                                debug!("Dropped carried-over entry {stale}");
                                self.url_table.remove(url.as_str());
                            }
                        }
                        self.failed.insert(key.clone());
                        self.manifest.mark_failed(key.clone());
                        self.manifest.update_stats(|s| s.failed_assets += 1);
                        self.publish(ReplicationEvent::AssetFailed {
                            url: key.clone(),
                            error: e.to_string(),
                            attempts: attempt + 1,
                            timestamp: chrono::Utc::now(),
                        });
                        break;
                    }
                    tokio::time::sleep(retry_delay(self.options.retry_delay_base(), attempt)).await;
                    attempt += 1;
                }
            }
        }

        self.pending.remove(&key);
    }

    /// One attempt: request, stream through the stages, record
    async fn fetch_once(&self, url: &Url, local: &str) -> ReplicaResult<FetchOutcome> {
        self.security.ensure_fetch_safe(url)?;

        let previous = if self.options.incremental() {
            let compressed = format!("{local}.br");
            self.manifest
                .previous(local)
                .map(|e| (local.to_string(), e))
                .or_else(|| self.manifest.previous(&compressed).map(|e| (compressed, e)))
        } else {
            None
        };

        let mut request = self.client.get(url.as_str());
        if let Some((_, entry)) = &previous {
            if let Some(etag) = &entry.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = &entry.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified);
            }
        }

        let started = Instant::now();
        let request_timeout = self.options.request_timeout();
        let response = tokio::time::timeout(request_timeout, request.send())
            .await
            .map_err(|_| ReplicaError::RequestAborted {
                url: url.to_string(),
                timeout: request_timeout,
            })?
            .map_err(|e| ReplicaError::fetch(url.as_str(), e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_MODIFIED {
            if let Some((path, _)) = previous {
                self.manifest.mark_unchanged(&path);
                self.url_table.insert(url.to_string(), path);
            }
            self.manifest.update_stats(|s| s.skipped_assets += 1);
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(ReplicaError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let (mut content_type, etag, last_modified) = {
            let headers = response.headers();
            let header = |name: HeaderName| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            (
                header(CONTENT_TYPE).unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string()),
                header(ETAG),
                header(LAST_MODIFIED),
            )
        };

        let transform = Transform::select(&content_type, &self.options);
        let compress = self.options.compression() == CompressionPolicy::Brotli
            && is_compressible(&content_type);
        let stored_path = if compress {
            format!("{local}.br")
        } else {
            local.to_string()
        };
        let destination = self.security.resolve_output_path(&stored_path)?;
        let limit = self.options.max_asset_size();

        let mut writer = StagedWriter::create(url.as_str(), &destination, compress, limit)?;
        let mut buffered: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ReplicaError::fetch(url.as_str(), e))?;
            if transform.is_buffered() {
                if (buffered.len() + chunk.len()) as u64 > limit {
                    return Err(ReplicaError::MaxSizeExceeded {
                        url: url.to_string(),
                        limit,
                    });
                }
                buffered.extend_from_slice(&chunk);
            } else {
                writer.write_chunk(&chunk)?;
            }
        }

        if transform.is_buffered() {
            let (bytes, new_type) = tokio::task::spawn_blocking(move || transform.apply(buffered))
                .await
                .map_err(|e| ReplicaError::Fatal(format!("Transform task panicked: {e}")))?;
            if let Some(new_type) = new_type {
                content_type = new_type.to_string();
            }
            writer.write_chunk(&bytes)?;
        }

        let written = writer.finish()?;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let entry = AssetEntry::new(url.as_str(), content_type, written.size, written.integrity)
            .with_validators(etag, last_modified);
        self.manifest.record(stored_path.clone(), entry);
        self.url_table.insert(url.to_string(), stored_path.clone());
        self.manifest.update_stats(|s| {
            s.total_assets += 1;
            s.total_size += written.size;
            s.total_download_time += elapsed_ms;
        });

        Ok(FetchOutcome::Captured {
            local_path: stored_path,
            size: written.size,
        })
    }

    fn publish(&self, event: ReplicationEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

/// Delay before retry number `attempt + 1`
///
/// `base * 2^attempt`, capped at 30 s, plus up to a second of jitter (never
/// more jitter than the base itself).
pub(crate) fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let backoff = base_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(MAX_RETRY_DELAY_MS);
    let jitter_cap = MAX_JITTER_MS.min(base_ms);
    let jitter = if jitter_cap == 0 {
        0
    } else {
        rand::rng().random_range(0..jitter_cap)
    };
    Duration::from_millis(backoff + jitter)
}
