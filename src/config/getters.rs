//! Getter methods for `ReplicationOptions`

use std::time::Duration;

use super::types::{
    BreakerSettings, Breakpoint, CompressionPolicy, ImagePolicy, ReplicationOptions, Viewport,
};

impl ReplicationOptions {
    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Navigation timeout, also applied around every breaker-wrapped operation
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn retry_delay_base(&self) -> Duration {
        Duration::from_millis(self.retry_delay_base_ms)
    }

    #[must_use]
    pub fn crawl_spa(&self) -> bool {
        self.crawl_spa
    }

    #[must_use]
    pub fn max_crawl_depth(&self) -> u32 {
        self.max_crawl_depth
    }

    #[must_use]
    pub fn respect_robots_txt(&self) -> bool {
        self.respect_robots_txt
    }

    #[must_use]
    pub fn image_policy(&self) -> ImagePolicy {
        self.image_policy
    }

    #[must_use]
    pub fn image_quality(&self) -> u8 {
        self.image_quality
    }

    #[must_use]
    pub fn compression(&self) -> CompressionPolicy {
        self.compression
    }

    #[must_use]
    pub fn minify_css(&self) -> bool {
        self.minify_css
    }

    #[must_use]
    pub fn minify_html(&self) -> bool {
        self.minify_html
    }

    #[must_use]
    pub fn page_concurrency(&self) -> usize {
        self.page_concurrency
    }

    #[must_use]
    pub fn base_asset_concurrency(&self) -> usize {
        self.base_asset_concurrency
    }

    #[must_use]
    pub fn domain_asset_concurrency(&self) -> usize {
        self.domain_asset_concurrency
    }

    #[must_use]
    pub fn request_interval(&self) -> Option<Duration> {
        self.request_interval_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn adaptive_concurrency(&self) -> bool {
        self.adaptive_concurrency
    }

    #[must_use]
    pub fn max_asset_size(&self) -> u64 {
        self.max_asset_size
    }

    /// Abort-based per-request timeout for asset, robots and sitemap fetches
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn incremental(&self) -> bool {
        self.incremental
    }

    #[must_use]
    pub fn responsive(&self) -> bool {
        self.responsive
    }

    #[must_use]
    pub fn allowed_domains(&self) -> &[String] {
        &self.allowed_domains
    }

    #[must_use]
    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    #[must_use]
    pub fn memory_threshold(&self) -> f64 {
        self.memory_threshold
    }

    #[must_use]
    pub fn memory_check_interval(&self) -> Duration {
        Duration::from_millis(self.memory_check_interval_ms)
    }

    #[must_use]
    pub fn circuit_breaker(&self) -> BreakerSettings {
        self.circuit_breaker
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[must_use]
    pub fn allow_private_network(&self) -> bool {
        self.allow_private_network
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }

    #[must_use]
    pub fn stealth(&self) -> bool {
        self.stealth
    }
}
