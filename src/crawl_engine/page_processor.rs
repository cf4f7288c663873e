//! Single page processing
//!
//! Handles the complete lifecycle of one page visit:
//! - SSRF and robots.txt gating
//! - Navigation with conditional headers when resuming
//! - Sub-resource discovery from network responses
//! - Link rewriting, minification and atomic persistence
//! - Responsive screenshots
//! - Same-origin link discovery for the next depth level

use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EventResponseReceived, Headers, ResourceType, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use dashmap::DashMap;
use futures::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use url::Url;

use super::crawl_types::{PageOutcome, PageTask, ReplicaError, ReplicaResult};
use super::page_timeout::with_page_timeout;
use super::seeds::RobotsRules;
use crate::browser_setup::apply_stealth_measures;
use crate::config::{Breakpoint, ReplicationOptions};
use crate::content_saver::{AssetPipeline, write_atomic};
use crate::crawl_events::{ReplicationEvent, ReplicationEventBus};
use crate::link_rewriter::{PageLinks, extract_page_links, minify_html, rewrite_html};
use crate::manifest::{AssetEntry, ManifestStore};
use crate::security::SecurityGuard;
use crate::utils::{local_path_for_url, screenshot_path, strip_fragment};

/// Browser handle shared by every page task; `None` once shut down
pub type SharedBrowser = Arc<RwLock<Option<Browser>>>;

/// Quiet period that counts as network idle
const NETWORK_IDLE: Duration = Duration::from_millis(500);
const IDLE_POLL: Duration = Duration::from_millis(100);
/// Settle time after resizing the viewport before a screenshot
const RESIZE_SETTLE: Duration = Duration::from_millis(500);

/// What a processed page produced
#[derive(Debug, Clone)]
pub struct PageReport {
    pub outcome: PageOutcome,
    /// Same-origin links to enqueue at `depth + 1`
    pub links: Vec<Url>,
}

impl PageReport {
    fn skipped(outcome: PageOutcome) -> Self {
        Self {
            outcome,
            links: Vec::new(),
        }
    }
}

/// Main document response as observed over CDP
#[derive(Debug, Clone)]
struct MainDocument {
    status: i64,
    etag: Option<String>,
    last_modified: Option<String>,
}

/// Responses observed while a page loads
#[derive(Debug)]
struct ResponseLog {
    main: Option<MainDocument>,
    assets: Vec<String>,
    seen: HashSet<String>,
    last_activity: Instant,
}

impl ResponseLog {
    fn new() -> Self {
        Self {
            main: None,
            assets: Vec::new(),
            seen: HashSet::new(),
            last_activity: Instant::now(),
        }
    }

    fn record(&mut self, event: &EventResponseReceived) {
        self.last_activity = Instant::now();
        let response = &event.response;

        // the first document response is the navigation itself
        if self.main.is_none() && event.r#type == ResourceType::Document {
            self.main = Some(MainDocument {
                status: response.status,
                etag: header_value(&response.headers, "etag"),
                last_modified: header_value(&response.headers, "last-modified"),
            });
            return;
        }

        if (200..300).contains(&response.status)
            && !response.url.starts_with("data:")
            && self.seen.insert(response.url.clone())
        {
            self.assets.push(response.url.clone());
        }
    }
}

/// Case-insensitive lookup in a CDP header object
fn header_value(headers: &Headers, name: &str) -> Option<String> {
    headers
        .inner()
        .as_object()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, value)| value.as_str())
        .map(str::to_string)
}

/// Renders pages and hands their sub-resources to the asset pipeline
pub struct PageRenderer {
    options: Arc<ReplicationOptions>,
    browser: SharedBrowser,
    security: Arc<SecurityGuard>,
    manifest: Arc<ManifestStore>,
    pipeline: Arc<AssetPipeline>,
    url_table: Arc<DashMap<String, String>>,
    robots: RobotsRules,
    events: Option<ReplicationEventBus>,
}

impl PageRenderer {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        options: Arc<ReplicationOptions>,
        browser: SharedBrowser,
        security: Arc<SecurityGuard>,
        manifest: Arc<ManifestStore>,
        pipeline: Arc<AssetPipeline>,
        url_table: Arc<DashMap<String, String>>,
        robots: RobotsRules,
        events: Option<ReplicationEventBus>,
    ) -> Self {
        Self {
            options,
            browser,
            security,
            manifest,
            pipeline,
            url_table,
            robots,
            events,
        }
    }

    /// Process one page task
    ///
    /// SSRF rejections and robots.txt exclusions come back as outcomes, not
    /// errors. Any error returned is a page failure; the caller logs and
    /// counts it.
    pub async fn process(&self, task: &PageTask) -> ReplicaResult<PageReport> {
        let url = strip_fragment(Url::parse(&task.url)?);

        if !self.security.is_url_fetch_safe(&url) {
            warn!("Blocked potentially unsafe URL: {url}");
            self.publish_skip(&url, "blocked by SSRF policy");
            return Ok(PageReport::skipped(PageOutcome::Blocked));
        }
        if self.options.respect_robots_txt()
            && !self.robots.is_allowed(url.as_str(), self.options.user_agent())
        {
            warn!("Disallowed by robots.txt: {url}");
            self.publish_skip(&url, "disallowed by robots.txt");
            return Ok(PageReport::skipped(PageOutcome::RobotsDisallowed));
        }

        info!("Processing page [depth {}]: {url}", task.depth);

        let page = {
            let guard = self.browser.read().await;
            let browser = guard
                .as_ref()
                .ok_or_else(|| ReplicaError::Browser("browser already closed".to_string()))?;
            with_page_timeout(
                browser.new_page("about:blank"),
                self.options.timeout(),
                "Page creation",
            )
            .await?
        };

        let result = self.render(&page, &url, task.depth).await;

        if let Err(e) = page.close().await {
            debug!("Failed to close page for {url}: {e}");
        }
        result
    }

    async fn render(&self, page: &Page, url: &Url, depth: u32) -> ReplicaResult<PageReport> {
        let timeout = self.options.timeout();
        let local = local_path_for_url(url);

        let viewport = self.options.viewport();
        set_viewport(page, viewport.width, viewport.height, timeout).await?;

        if self.options.stealth() {
            with_page_timeout(
                apply_stealth_measures(page, self.options.user_agent()),
                timeout,
                "Stealth injection",
            )
            .await?;
        }

        if self.options.incremental()
            && let Some(previous) = self.manifest.previous(&local)
        {
            let mut headers = serde_json::Map::new();
            if let Some(etag) = previous.etag {
                headers.insert("If-None-Match".to_string(), etag.into());
            }
            if let Some(last_modified) = previous.last_modified {
                headers.insert("If-Modified-Since".to_string(), last_modified.into());
            }
            if !headers.is_empty() {
                let params = SetExtraHttpHeadersParams::new(Headers::new(
                    serde_json::Value::Object(headers),
                ));
                with_page_timeout(page.execute(params), timeout, "Conditional headers").await?;
            }
        }

        let mut responses = with_page_timeout(
            page.event_listener::<EventResponseReceived>(),
            timeout,
            "Response listener",
        )
        .await?;
        let log = Arc::new(Mutex::new(ResponseLog::new()));
        let collector = {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                while let Some(event) = responses.next().await {
                    log.lock().record(&event);
                }
            })
        };

        let navigated = with_page_timeout(page.goto(url.as_str()), timeout, "Page navigation")
            .await
            .map(|_| ());
        if navigated.is_ok() {
            wait_for_network_idle(page, &log, timeout).await;
        }
        collector.abort();
        navigated?;

        let (main, discovered) = {
            let log = log.lock();
            (log.main.clone(), log.assets.clone())
        };

        if let Some(main) = &main {
            if main.status == 304 {
                info!("Not modified (304): {url}");
                self.manifest.mark_unchanged(&local);
                self.url_table.insert(url.to_string(), local);
                self.manifest.update_stats(|s| s.skipped_assets += 1);
                self.publish_skip(url, "not modified");
                return Ok(PageReport::skipped(PageOutcome::NotModified));
            }
            if main.status >= 400 {
                return Err(ReplicaError::HttpStatus {
                    url: url.to_string(),
                    status: u16::try_from(main.status).unwrap_or(u16::MAX),
                });
            }
        }

        self.url_table.insert(url.to_string(), local.clone());
        let assets_discovered = self.dispatch_assets(url, &discovered);

        let html = with_page_timeout(page.content(), timeout, "Content read").await?;

        let links = if self.options.crawl_spa() && depth < self.options.max_crawl_depth() {
            let links = extract_page_links(&html, url);
            for link in &links {
                self.url_table
                    .entry(link.to_string())
                    .or_insert_with(|| local_path_for_url(link));
            }
            links
        } else {
            Vec::new()
        };

        let (mut rewritten, replaced) =
            rewrite_html(&html, &PageLinks::new(url, &local, &*self.url_table))?;
        debug!("Rewrote {replaced} references in {url}");
        if self.options.minify_html() {
            rewritten = minify_html(&rewritten);
        }

        let destination = self.security.resolve_output_path(&local)?;
        let bytes = rewritten.into_bytes();
        let size = bytes.len() as u64;
        let integrity = tokio::task::spawn_blocking(move || write_atomic(&destination, &bytes))
            .await
            .map_err(|e| ReplicaError::Fatal(format!("Page write task panicked: {e}")))??;

        let (etag, last_modified) = main
            .map(|m| (m.etag, m.last_modified))
            .unwrap_or_default();
        let entry = AssetEntry::new(url.as_str(), "text/html", size, integrity)
            .with_validators(etag, last_modified);
        self.manifest.record(local.clone(), entry);
        self.manifest.update_stats(|s| s.crawled_pages += 1);
        info!("Page captured: {local} ({:.2} KB)", size as f64 / 1024.0);

        if self.options.responsive() {
            for breakpoint in self.options.breakpoints() {
                if let Err(e) = self.capture_screenshot(page, &local, breakpoint).await {
                    warn!("Failed screenshot for {} at {}: {e}", url, breakpoint.name);
                }
            }
        }

        if let Some(bus) = &self.events {
            bus.publish(ReplicationEvent::PageCaptured {
                url: url.to_string(),
                local_path: local.clone(),
                depth,
                assets_discovered,
                timestamp: chrono::Utc::now(),
            });
        }

        Ok(PageReport {
            outcome: PageOutcome::Captured { local_path: local },
            links,
        })
    }

    /// Map every in-scope response to its local path and queue its capture
    ///
    /// The table entry goes in before the capture is queued so the page
    /// rewrite sees it; a completed capture may later replace it with the
    /// compressed path.
    fn dispatch_assets(&self, page_url: &Url, discovered: &[String]) -> usize {
        let mut dispatched = 0;
        for raw in discovered {
            let Ok(asset) = Url::parse(raw) else {
                continue;
            };
            let asset = strip_fragment(asset);
            if asset == *page_url || !self.pipeline.in_scope(&asset) || self.pipeline.is_failed(&asset)
            {
                continue;
            }
            self.url_table
                .entry(asset.to_string())
                .or_insert_with(|| local_path_for_url(&asset));
            if self.pipeline.capture(&asset) {
                dispatched += 1;
            }
        }
        debug!("{page_url}: {} responses, {dispatched} new assets queued", discovered.len());
        dispatched
    }

    async fn capture_screenshot(
        &self,
        page: &Page,
        page_local: &str,
        breakpoint: &Breakpoint,
    ) -> ReplicaResult<()> {
        let timeout = self.options.timeout();
        info!("Capturing screenshot of {page_local} at {}", breakpoint.name);

        set_viewport(page, breakpoint.width, breakpoint.height, timeout).await?;
        tokio::time::sleep(RESIZE_SETTLE).await;

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        let png = with_page_timeout(page.screenshot(params), timeout, "Screenshot").await?;

        let shot_path = screenshot_path(page_local, &breakpoint.name);
        let destination = self.security.resolve_output_path(&shot_path)?;
        tokio::task::spawn_blocking(move || write_atomic(&destination, &png))
            .await
            .map_err(|e| ReplicaError::Fatal(format!("Screenshot write task panicked: {e}")))??;

        self.manifest
            .attach_screenshot(page_local, &breakpoint.name, &shot_path);
        info!("Screenshot saved: {shot_path}");
        Ok(())
    }

    fn publish_skip(&self, url: &Url, reason: &str) {
        if let Some(bus) = &self.events {
            bus.publish(ReplicationEvent::PageSkipped {
                url: url.to_string(),
                reason: reason.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
    }
}

async fn set_viewport(page: &Page, width: u32, height: u32, timeout: Duration) -> ReplicaResult<()> {
    let params = SetDeviceMetricsOverrideParams::builder()
        .width(i64::from(width))
        .height(i64::from(height))
        .device_scale_factor(1.0)
        .mobile(false)
        .build()
        .map_err(ReplicaError::Browser)?;
    with_page_timeout(page.execute(params), timeout, "Viewport override").await?;
    Ok(())
}

/// Wait until the document is complete and no response arrived for
/// `NETWORK_IDLE`, giving up silently at `timeout`
async fn wait_for_network_idle(page: &Page, log: &Mutex<ResponseLog>, timeout: Duration) {
    let start = Instant::now();
    loop {
        if start.elapsed() >= timeout {
            debug!("Network idle wait timed out after {timeout:?}, proceeding anyway");
            return;
        }
        tokio::time::sleep(IDLE_POLL).await;

        let quiet = log.lock().last_activity.elapsed() >= NETWORK_IDLE;
        if !quiet {
            continue;
        }
        let complete = match page.evaluate("document.readyState").await {
            Ok(result) => result.into_value::<String>().is_ok_and(|state| state == "complete"),
            Err(e) => {
                debug!("readyState check failed: {e}");
                false
            }
        };
        if complete {
            return;
        }
    }
}
