//! Main replication orchestration logic
//!
//! Coordinates a whole run:
//! - Output directory, manifest and browser lifecycle
//! - Seed discovery and breadth-first page scheduling
//! - Two-tier idle detection across the page queue and every domain queue
//! - Memory backpressure
//! - Idempotent shutdown that always runs, also from signal handlers

use dashmap::{DashMap, DashSet};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use url::Url;

use super::cleanup::{CleanupResult, cleanup_browser_and_data};
use super::crawl_types::{PageOutcome, PageTask, ReplicaError, ReplicaResult};
use super::domain_scheduler::DomainScheduler;
use super::memory_monitor::{Backpressure, MemoryMonitor};
use super::page_processor::{PageRenderer, SharedBrowser};
use super::seeds::discover_seeds;
use super::worker_pool::WorkerPool;
use crate::browser_setup::{LaunchSettings, launch_browser};
use crate::config::ReplicationOptions;
use crate::content_saver::{AssetPipeline, build_http_client};
use crate::crawl_events::{ReplicationEvent, ReplicationEventBus};
use crate::manifest::{ManifestStore, Stats};
use crate::security::SecurityGuard;
use crate::utils::memory::resident_bytes;
use crate::utils::{
    MemorySampler, ProcessMemorySampler, hostname_of, normalize_page_url, strip_fragment,
};

/// Resources a live run owns; taken exactly once by `shutdown`
struct RunResources {
    page_pool: Arc<WorkerPool>,
    scheduler: Arc<DomainScheduler>,
    monitor: Arc<MemoryMonitor>,
    browser: SharedBrowser,
    handler: Option<JoinHandle<()>>,
    chrome_data_dir: Option<PathBuf>,
}

/// Entry point for replication runs
pub struct Replicator {
    options: Arc<ReplicationOptions>,
    events: ReplicationEventBus,
    sampler: Arc<dyn MemorySampler>,
    resources: Mutex<Option<RunResources>>,
    shut_down: AtomicBool,
}

impl Replicator {
    #[must_use]
    pub fn new(options: ReplicationOptions) -> Self {
        Self {
            options: Arc::new(options),
            events: ReplicationEventBus::default(),
            sampler: Arc::new(ProcessMemorySampler),
            resources: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Replace the memory sampler used for backpressure and adaptive
    /// concurrency
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn MemorySampler>) -> Self {
        self.sampler = sampler;
        self
    }

    #[must_use]
    pub fn options(&self) -> &ReplicationOptions {
        &self.options
    }

    /// Bus every component of this replicator publishes to
    #[must_use]
    pub fn events(&self) -> &ReplicationEventBus {
        &self.events
    }

    /// Mirror `url` into `output_dir`
    ///
    /// Resolves once the page queue and every domain asset queue have
    /// drained and the manifest is saved. Per-page and per-asset failures are
    /// logged and counted; only setup failures (output directory, browser
    /// launch) are returned as errors. Shutdown runs either way.
    pub async fn replicate(&self, url: &str, output_dir: &Path) -> ReplicaResult<Stats> {
        self.shut_down.store(false, Ordering::SeqCst);
        let result = self.run(url, output_dir).await;
        self.shutdown().await;
        if let Err(e) = &result {
            error!("Replication failed: {e}");
        }
        result
    }

    async fn run(&self, url: &str, output_dir: &Path) -> ReplicaResult<Stats> {
        let started = Instant::now();
        let entry = strip_fragment(Url::parse(url)?);
        if !matches!(entry.scheme(), "http" | "https") {
            return Err(ReplicaError::Config(format!(
                "Only http(s) URLs can be replicated: {entry}"
            )));
        }
        let base_host = hostname_of(&entry)
            .ok_or_else(|| ReplicaError::Config(format!("URL has no host: {entry}")))?;

        tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
            ReplicaError::Fatal(format!(
                "Failed to create output directory {}: {e}",
                output_dir.display()
            ))
        })?;

        let options = Arc::clone(&self.options);
        let security = Arc::new(SecurityGuard::new(
            output_dir,
            options.allow_private_network(),
        ));
        let manifest = Arc::new(if options.incremental() {
            ManifestStore::load(output_dir, entry.as_str()).await
        } else {
            ManifestStore::new(entry.as_str())
        });
        manifest.update_stats(|s| s.start_time = Some(chrono::Utc::now()));

        // carried-over entries let pages link to files this run never refetches
        let url_table: Arc<DashMap<String, String>> = Arc::new(DashMap::new());
        for (path, previous) in manifest.previous_entries() {
            url_table.insert(previous.original_url, path);
        }

        let client = build_http_client(&options)?;
        let scheduler = Arc::new(DomainScheduler::new(
            base_host.clone(),
            &options,
            Arc::clone(&self.sampler),
            Some(self.events.clone()),
        ));
        let pipeline = Arc::new(AssetPipeline::new(
            &base_host,
            Arc::clone(&options),
            client.clone(),
            Arc::clone(&security),
            Arc::clone(&scheduler),
            Arc::clone(&manifest),
            Arc::clone(&url_table),
            Some(self.events.clone()),
        ));
        let page_pool = Arc::new(WorkerPool::new(
            "pages",
            options.page_concurrency(),
            options.request_interval(),
        ));
        let targets: Vec<Arc<dyn Backpressure>> = vec![
            Arc::clone(&page_pool) as Arc<dyn Backpressure>,
            Arc::clone(&scheduler) as Arc<dyn Backpressure>,
        ];
        let monitor = Arc::new(
            MemoryMonitor::new(
                options.memory_check_interval(),
                options.memory_threshold(),
                Arc::clone(&self.sampler),
                targets,
            )
            .with_events(self.events.clone()),
        );
        let browser: SharedBrowser = Arc::new(RwLock::new(None));

        *self.resources.lock() = Some(RunResources {
            page_pool: Arc::clone(&page_pool),
            scheduler: Arc::clone(&scheduler),
            monitor: Arc::clone(&monitor),
            browser: Arc::clone(&browser),
            handler: None,
            chrome_data_dir: None,
        });

        let settings = LaunchSettings {
            headless: options.headless(),
            viewport: options.viewport(),
            user_agent: options.user_agent().to_string(),
            request_timeout: options.timeout(),
            stealth: options.stealth(),
        };
        let (launched, handler, chrome_data_dir) = launch_browser(&settings)
            .await
            .map_err(|e| ReplicaError::Browser(format!("Failed to launch browser: {e:#}")))?;
        *browser.write().await = Some(launched);
        if let Some(resources) = self.resources.lock().as_mut() {
            resources.handler = Some(handler);
            resources.chrome_data_dir = Some(chrome_data_dir);
        }

        monitor.start();

        let seeds = discover_seeds(
            &client,
            &security,
            &entry,
            options.respect_robots_txt(),
            options.request_timeout(),
        )
        .await?;
        info!(
            "Replicating {entry} into {} ({} seed URLs)",
            output_dir.display(),
            seeds.urls.len()
        );
        self.events.publish(ReplicationEvent::ReplicationStarted {
            source_url: entry.to_string(),
            output_dir: output_dir.to_path_buf(),
            seeds: seeds.urls.len(),
            timestamp: chrono::Utc::now(),
        });

        let renderer = PageRenderer::new(
            Arc::clone(&options),
            Arc::clone(&browser),
            Arc::clone(&security),
            Arc::clone(&manifest),
            Arc::clone(&pipeline),
            Arc::clone(&url_table),
            seeds.robots,
            Some(self.events.clone()),
        );
        let crawl = Arc::new(PageCrawl {
            renderer,
            pool: Arc::clone(&page_pool),
            crawled: DashSet::new(),
            failed: DashSet::new(),
            manifest: Arc::clone(&manifest),
            pipeline: Arc::clone(&pipeline),
            max_depth: options.max_crawl_depth(),
            events: self.events.clone(),
        });
        for seed in seeds.urls {
            crawl.enqueue(seed, 0);
        }

        // pages discover assets, and asset queues can only be judged idle
        // once the page queue is; recheck both until neither has work
        loop {
            page_pool.on_idle().await;
            scheduler.wait_idle().await;
            if self.shut_down.load(Ordering::SeqCst) {
                return Err(ReplicaError::Fatal("Replication interrupted".to_string()));
            }
            if page_pool.is_idle() && scheduler.is_idle() {
                break;
            }
        }

        manifest.update_stats(|s| s.end_time = Some(chrono::Utc::now()));
        manifest.save(output_dir).await?;

        let stats = manifest.stats();
        let duration = started.elapsed();
        info!(
            "Replication complete in {:.1}s: {} pages ({} failed), {} assets ({:.2} MB), {} skipped, {} failed",
            duration.as_secs_f64(),
            stats.crawled_pages,
            stats.failed_pages,
            stats.total_assets,
            stats.total_size as f64 / (1024.0 * 1024.0),
            stats.skipped_assets,
            stats.failed_assets
        );
        self.events.publish(ReplicationEvent::ReplicationCompleted {
            stats: stats.clone(),
            duration,
            timestamp: chrono::Utc::now(),
        });
        Ok(stats)
    }

    /// Stop the current run and release its resources
    ///
    /// Queued work is dropped, in-flight work is abandoned, the memory monitor
    /// stops and the browser is closed. Safe to call any number of times and
    /// from a signal handler while `replicate` is running.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(resources) = self.resources.lock().take() else {
            return;
        };
        info!(target: "replicator::cleanup", "Shutting down");

        resources.monitor.stop();
        let dropped = resources.page_pool.queued();
        resources.page_pool.abort_all();
        if dropped > 0 {
            info!(target: "replicator::cleanup", "Dropped {dropped} queued pages");
        }
        resources.scheduler.shutdown();

        let browser = resources.browser.write().await.take();
        match (browser, resources.handler) {
            (Some(browser), Some(handler)) => {
                let data_dir = resources.chrome_data_dir.unwrap_or_default();
                match cleanup_browser_and_data(browser, handler, data_dir).await {
                    CleanupResult::Success => {
                        debug!(target: "replicator::cleanup", "Browser closed");
                    }
                    CleanupResult::PartialFailure(errors) => {
                        warn!(
                            target: "replicator::cleanup",
                            "Browser cleanup incomplete: {}",
                            errors.join("; ")
                        );
                    }
                }
            }
            (_, Some(handler)) => handler.abort(),
            _ => {}
        }
    }
}

/// Page-level state shared by every page job of one run
struct PageCrawl {
    renderer: PageRenderer,
    pool: Arc<WorkerPool>,
    /// Normalized URLs ever enqueued, so each page is visited once
    crawled: DashSet<String>,
    /// Pages that errored or were refused by the SSRF policy
    failed: DashSet<String>,
    manifest: Arc<ManifestStore>,
    pipeline: Arc<AssetPipeline>,
    max_depth: u32,
    events: ReplicationEventBus,
}

impl PageCrawl {
    fn enqueue(self: &Arc<Self>, url: String, depth: u32) {
        if depth > self.max_depth {
            return;
        }
        let Some(url) = normalize_page_url(&url) else {
            debug!("Skipping unparsable page URL: {url}");
            return;
        };
        if !self.crawled.insert(url.clone()) {
            return;
        }
        let crawl = Arc::clone(self);
        self.pool.submit(async move {
            crawl.visit(PageTask { url, depth }).await;
        });
    }

    async fn visit(self: Arc<Self>, task: PageTask) {
        match self.renderer.process(&task).await {
            Ok(report) => match report.outcome {
                PageOutcome::Captured { .. } => {
                    for link in report.links {
                        self.enqueue(link.to_string(), task.depth + 1);
                    }
                }
                PageOutcome::Blocked => self.record_failure(&task.url, "blocked by SSRF policy"),
                PageOutcome::NotModified | PageOutcome::RobotsDisallowed => {}
            },
            Err(e) => {
                error!("Failed to process page {}: {e}", task.url);
                self.record_failure(&task.url, &e.to_string());
            }
        }
        self.log_progress();
    }

    fn record_failure(&self, url: &str, error: &str) {
        if !self.failed.insert(url.to_string()) {
            return;
        }
        self.manifest.mark_failed(url);
        self.manifest.update_stats(|s| s.failed_pages += 1);
        self.events.publish(ReplicationEvent::PageFailed {
            url: url.to_string(),
            error: error.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    fn log_progress(&self) {
        let stats = self.manifest.stats();
        debug!(
            "Progress: {} pages ({} failed), {} assets, {:.2} MB, {:.1}% success, {:.0} ms avg, \
             queue {} pages / {} assets, {} failed assets, rss {}",
            stats.crawled_pages,
            self.failed.len(),
            stats.total_assets,
            stats.total_size as f64 / (1024.0 * 1024.0),
            stats.success_rate(),
            stats.average_latency_ms(),
            self.pool.queued(),
            self.pipeline.pending_count(),
            self.pipeline.failed_count(),
            resident_bytes().map_or_else(
                || "n/a".to_string(),
                |bytes| format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
            )
        );
    }
}
