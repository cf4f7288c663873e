//! Shared configuration constants for the replicator
//!
//! This module contains default values and configuration constants used
//! throughout the codebase to ensure consistency and avoid magic numbers.

/// Default page-level concurrency: 4 rendered pages at a time
pub const DEFAULT_PAGE_CONCURRENCY: usize = 4;

/// Asset concurrency for the crawled site's own origin
pub const DEFAULT_BASE_ASSET_CONCURRENCY: usize = 10;

/// Asset concurrency for every other allowed hostname
///
/// Kept low so a CDN hosting many files is not hammered while the base origin
/// still gets the bulk of the parallelism.
pub const DEFAULT_DOMAIN_ASSET_CONCURRENCY: usize = 3;

/// Default maximum crawl depth: 2 link hops from the entry URL
pub const DEFAULT_MAX_CRAWL_DEPTH: u32 = 2;

/// Largest asset written to disk: 5 MiB
pub const DEFAULT_MAX_ASSET_SIZE: u64 = 5 * 1024 * 1024;

/// Abort-based timeout for a single asset request
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Gap between dispatches when robots.txt is ignored
pub const POLITE_REQUEST_INTERVAL_MS: u64 = 1000;

/// Upper bound for a single retry delay before jitter
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Redirect hops followed by the asset client
pub const MAX_REDIRECTS: usize = 10;

/// Name of the manifest file written at the output root
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Desktop Chrome user agent sent by both the browser and the HTTP client
///
/// Chrome releases new stable versions ~every 4 weeks.
/// Update quarterly to stay within reasonable version window.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";
