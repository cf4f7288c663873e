//! Fluent builder for `ReplicationOptions`
//!
//! Every setter is optional; `build()` validates the combined result so a run
//! never starts with a zero-sized pool or an impossible memory threshold.

use std::path::Path;

use super::types::{
    BreakerSettings, Breakpoint, CompressionPolicy, ImagePolicy, ReplicationOptions, Viewport,
};
use crate::crawl_engine::crawl_types::{ReplicaError, ReplicaResult};
use crate::utils::constants::POLITE_REQUEST_INTERVAL_MS;

#[derive(Debug, Clone, Default)]
pub struct ReplicationOptionsBuilder {
    options: ReplicationOptions,
}

impl ReplicationOptions {
    /// Create a builder seeded with the default options
    #[must_use]
    pub fn builder() -> ReplicationOptionsBuilder {
        ReplicationOptionsBuilder::default()
    }

    /// Load options from a JSON file; missing keys keep their defaults
    ///
    /// # Errors
    ///
    /// Returns `ReplicaError::Config` if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> ReplicaResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ReplicaError::Config(format!("Failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| ReplicaError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Continue building from an existing set of options
    #[must_use]
    pub fn into_builder(self) -> ReplicationOptionsBuilder {
        ReplicationOptionsBuilder { options: self }
    }
}

impl ReplicationOptionsBuilder {
    #[must_use]
    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.options.viewport = Viewport { width, height };
        self
    }

    #[must_use]
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.options.timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.options.max_retries = retries;
        self
    }

    #[must_use]
    pub fn retry_delay_base_ms(mut self, ms: u64) -> Self {
        self.options.retry_delay_base_ms = ms;
        self
    }

    #[must_use]
    pub fn crawl_spa(mut self, enabled: bool) -> Self {
        self.options.crawl_spa = enabled;
        self
    }

    #[must_use]
    pub fn max_crawl_depth(mut self, depth: u32) -> Self {
        self.options.max_crawl_depth = depth;
        self
    }

    #[must_use]
    pub fn respect_robots_txt(mut self, respect: bool) -> Self {
        self.options.respect_robots_txt = respect;
        self
    }

    #[must_use]
    pub fn image_policy(mut self, policy: ImagePolicy) -> Self {
        self.options.image_policy = policy;
        self
    }

    #[must_use]
    pub fn image_quality(mut self, quality: u8) -> Self {
        self.options.image_quality = quality;
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: CompressionPolicy) -> Self {
        self.options.compression = compression;
        self
    }

    #[must_use]
    pub fn minify_css(mut self, enabled: bool) -> Self {
        self.options.minify_css = enabled;
        self
    }

    #[must_use]
    pub fn minify_html(mut self, enabled: bool) -> Self {
        self.options.minify_html = enabled;
        self
    }

    #[must_use]
    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.options.page_concurrency = n;
        self
    }

    #[must_use]
    pub fn base_asset_concurrency(mut self, n: usize) -> Self {
        self.options.base_asset_concurrency = n;
        self
    }

    #[must_use]
    pub fn domain_asset_concurrency(mut self, n: usize) -> Self {
        self.options.domain_asset_concurrency = n;
        self
    }

    #[must_use]
    pub fn request_interval_ms(mut self, ms: Option<u64>) -> Self {
        self.options.request_interval_ms = ms;
        self
    }

    #[must_use]
    pub fn adaptive_concurrency(mut self, enabled: bool) -> Self {
        self.options.adaptive_concurrency = enabled;
        self
    }

    #[must_use]
    pub fn max_asset_size(mut self, bytes: u64) -> Self {
        self.options.max_asset_size = bytes;
        self
    }

    #[must_use]
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.options.request_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn incremental(mut self, enabled: bool) -> Self {
        self.options.incremental = enabled;
        self
    }

    #[must_use]
    pub fn responsive(mut self, enabled: bool) -> Self {
        self.options.responsive = enabled;
        self
    }

    #[must_use]
    pub fn allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.allowed_domains = domains
            .into_iter()
            .map(|d| d.into().trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn breakpoints(mut self, breakpoints: Vec<Breakpoint>) -> Self {
        self.options.breakpoints = breakpoints;
        self
    }

    #[must_use]
    pub fn memory_threshold(mut self, fraction: f64) -> Self {
        self.options.memory_threshold = fraction;
        self
    }

    #[must_use]
    pub fn memory_check_interval_ms(mut self, ms: u64) -> Self {
        self.options.memory_check_interval_ms = ms;
        self
    }

    #[must_use]
    pub fn circuit_breaker(mut self, settings: BreakerSettings) -> Self {
        self.options.circuit_breaker = settings;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.options.user_agent = ua.into();
        self
    }

    #[must_use]
    pub fn allow_private_network(mut self, allow: bool) -> Self {
        self.options.allow_private_network = allow;
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.options.headless = headless;
        self
    }

    #[must_use]
    pub fn stealth(mut self, stealth: bool) -> Self {
        self.options.stealth = stealth;
        self
    }

    /// Stop honouring robots.txt and switch to the polite crawl profile
    ///
    /// Concurrency drops to 1 page, 2 base-origin assets and 1 asset per other
    /// domain, with a fixed gap between dispatches.
    #[must_use]
    pub fn ignore_robots(mut self) -> Self {
        self.options.respect_robots_txt = false;
        self.options.page_concurrency = 1;
        self.options.base_asset_concurrency = 2;
        self.options.domain_asset_concurrency = 1;
        self.options.request_interval_ms = Some(POLITE_REQUEST_INTERVAL_MS);
        self
    }

    /// Validate and produce the options
    ///
    /// # Errors
    ///
    /// Returns `ReplicaError::Config` describing the first invalid field.
    pub fn build(self) -> ReplicaResult<ReplicationOptions> {
        let o = self.options;

        if o.page_concurrency == 0 || o.base_asset_concurrency == 0 || o.domain_asset_concurrency == 0
        {
            return Err(ReplicaError::Config(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        if !(o.memory_threshold > 0.0 && o.memory_threshold <= 1.0) {
            return Err(ReplicaError::Config(format!(
                "memory threshold must be in (0, 1], got {}",
                o.memory_threshold
            )));
        }
        if o.max_asset_size == 0 {
            return Err(ReplicaError::Config("maxAssetSize must be positive".to_string()));
        }
        if o.request_timeout_ms == 0 || o.timeout_ms == 0 {
            return Err(ReplicaError::Config("timeouts must be positive".to_string()));
        }
        if o.image_quality == 0 || o.image_quality > 100 {
            return Err(ReplicaError::Config(format!(
                "image quality must be in 1..=100, got {}",
                o.image_quality
            )));
        }
        if o.circuit_breaker.failure_threshold == 0 || o.circuit_breaker.success_threshold == 0 {
            return Err(ReplicaError::Config(
                "circuit breaker thresholds must be at least 1".to_string(),
            ));
        }
        for bp in &o.breakpoints {
            let valid_name = !bp.name.is_empty()
                && bp
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid_name || bp.width == 0 || bp.height == 0 {
                return Err(ReplicaError::Config(format!("invalid breakpoint {bp:?}")));
            }
        }

        Ok(o)
    }
}
