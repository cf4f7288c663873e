//! Core configuration types for replication runs
//!
//! This module contains `ReplicationOptions` and the small policy enums it is
//! made of. Options are immutable once a run starts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::constants::{
    DEFAULT_BASE_ASSET_CONCURRENCY, DEFAULT_DOMAIN_ASSET_CONCURRENCY, DEFAULT_MAX_ASSET_SIZE,
    DEFAULT_MAX_CRAWL_DEPTH, DEFAULT_PAGE_CONCURRENCY, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_USER_AGENT,
};

/// Target format for raster image transcoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImagePolicy {
    Avif,
    Webp,
    None,
}

impl ImagePolicy {
    /// MIME type produced by the transcoder, if any
    #[must_use]
    pub const fn target_mime(self) -> Option<&'static str> {
        match self {
            Self::Avif => Some("image/avif"),
            Self::Webp => Some("image/webp"),
            Self::None => None,
        }
    }
}

impl FromStr for ImagePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "avif" => Ok(Self::Avif),
            "webp" => Ok(Self::Webp),
            "none" | "off" => Ok(Self::None),
            other => Err(format!("unknown image policy '{other}' (expected avif, webp or none)")),
        }
    }
}

impl fmt::Display for ImagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Avif => "avif",
            Self::Webp => "webp",
            Self::None => "none",
        })
    }
}

/// Compression applied to text assets after transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionPolicy {
    None,
    Brotli,
}

impl FromStr for CompressionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "brotli" | "br" => Ok(Self::Brotli),
            other => Err(format!("unknown compression '{other}' (expected none or brotli)")),
        }
    }
}

impl fmt::Display for CompressionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Brotli => "brotli",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Named viewport used for responsive screenshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl Breakpoint {
    #[must_use]
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
        }
    }
}

/// Thresholds for the per-domain circuit breakers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// Base cooldown, doubled for every failure past the threshold
    pub retry_timeout_base_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            retry_timeout_base_ms: 1000,
        }
    }
}

/// Immutable per-run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplicationOptions {
    pub(crate) viewport: Viewport,
    /// Navigation timeout and the timeout wrapped around breaker operations
    pub(crate) timeout_ms: u64,
    pub(crate) max_retries: u32,
    pub(crate) retry_delay_base_ms: u64,
    pub(crate) crawl_spa: bool,
    pub(crate) max_crawl_depth: u32,
    pub(crate) respect_robots_txt: bool,
    pub(crate) image_policy: ImagePolicy,
    pub(crate) image_quality: u8,
    pub(crate) compression: CompressionPolicy,
    pub(crate) minify_css: bool,
    pub(crate) minify_html: bool,
    pub(crate) page_concurrency: usize,
    pub(crate) base_asset_concurrency: usize,
    pub(crate) domain_asset_concurrency: usize,
    /// Minimum gap between two dispatches on the same queue
    pub(crate) request_interval_ms: Option<u64>,
    pub(crate) adaptive_concurrency: bool,
    pub(crate) max_asset_size: u64,
    pub(crate) request_timeout_ms: u64,
    pub(crate) incremental: bool,
    pub(crate) responsive: bool,
    pub(crate) allowed_domains: Vec<String>,
    pub(crate) breakpoints: Vec<Breakpoint>,
    pub(crate) memory_threshold: f64,
    pub(crate) memory_check_interval_ms: u64,
    pub(crate) circuit_breaker: BreakerSettings,
    pub(crate) user_agent: String,
    /// Lets the crawler reach loopback and private hosts (local dev servers)
    pub(crate) allow_private_network: bool,
    pub(crate) headless: bool,
    /// Mask the usual headless-automation fingerprints on every page
    pub(crate) stealth: bool,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
            timeout_ms: 60_000,
            max_retries: 3,
            retry_delay_base_ms: 1000,
            crawl_spa: true,
            max_crawl_depth: DEFAULT_MAX_CRAWL_DEPTH,
            respect_robots_txt: true,
            image_policy: ImagePolicy::Avif,
            image_quality: 75,
            compression: CompressionPolicy::None,
            minify_css: true,
            minify_html: true,
            page_concurrency: DEFAULT_PAGE_CONCURRENCY,
            base_asset_concurrency: DEFAULT_BASE_ASSET_CONCURRENCY,
            domain_asset_concurrency: DEFAULT_DOMAIN_ASSET_CONCURRENCY,
            request_interval_ms: None,
            adaptive_concurrency: false,
            max_asset_size: DEFAULT_MAX_ASSET_SIZE,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            incremental: false,
            responsive: false,
            allowed_domains: Vec::new(),
            breakpoints: vec![
                Breakpoint::new("mobile", 375, 812),
                Breakpoint::new("desktop", 1920, 1080),
            ],
            memory_threshold: 0.85,
            memory_check_interval_ms: 15_000,
            circuit_breaker: BreakerSettings::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            allow_private_network: false,
            headless: true,
            stealth: true,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}
