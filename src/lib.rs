//! Website replication engine
//!
//! Renders pages in headless Chromium, captures every sub-resource they load
//! through per-domain worker pools guarded by circuit breakers, rewrites
//! references to local relative paths, and records each file in an
//! integrity-checked manifest that supports incremental re-runs.

pub mod browser_setup;
pub mod config;
pub mod content_saver;
pub mod crawl_engine;
pub mod crawl_events;
pub mod link_rewriter;
pub mod manifest;
pub mod security;
pub mod utils;

pub use browser_setup::{
    LaunchSettings, apply_stealth_measures, download_managed_browser, find_browser_executable,
    launch_browser, stealth_script,
};
pub use config::{
    BreakerSettings, Breakpoint, CompressionPolicy, ImagePolicy, ReplicationOptions,
    ReplicationOptionsBuilder, Viewport,
};
pub use content_saver::AssetPipeline;
pub use crawl_engine::{
    CircuitBreaker, CircuitState, DomainScheduler, MemoryMonitor, PageRenderer, ReplicaError,
    ReplicaResult, Replicator, WorkerPool,
};
pub use crawl_events::{ReplicationEvent, ReplicationEventBus};
pub use manifest::{AssetEntry, Manifest, ManifestStore, Stats, VerifyReport, verify};
pub use security::SecurityGuard;
