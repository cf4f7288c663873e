//! Event type definitions for the replication event system
//!
//! This module contains the events broadcast while a run progresses. Each
//! carries a UTC timestamp so subscribers can build their own timelines.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::manifest::Stats;

/// Circuit breaker state as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

/// Event types emitted during a replication run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplicationEvent {
    /// Emitted once seeds are known and the page queue starts
    ReplicationStarted {
        source_url: String,
        output_dir: PathBuf,
        seeds: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// A page was rendered, rewritten and written to disk
    PageCaptured {
        url: String,
        local_path: String,
        depth: u32,
        assets_discovered: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// A page was skipped (not modified, robots.txt, or SSRF policy)
    PageSkipped {
        url: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// A page could not be captured
    PageFailed {
        url: String,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    AssetCaptured {
        url: String,
        local_path: String,
        size: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// Conditional request answered with 304
    AssetSkipped {
        url: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// Retries exhausted or a terminal error hit
    AssetFailed {
        url: String,
        error: String,
        attempts: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    BreakerStateChanged {
        domain: String,
        from: BreakerPhase,
        to: BreakerPhase,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// Memory monitor paused or resumed every queue
    BackpressureChanged {
        paused: bool,
        pressure: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    ReplicationCompleted {
        stats: Stats,
        duration: std::time::Duration,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ReplicationEvent {
    /// Short name used in logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ReplicationStarted { .. } => "replication_started",
            Self::PageCaptured { .. } => "page_captured",
            Self::PageSkipped { .. } => "page_skipped",
            Self::PageFailed { .. } => "page_failed",
            Self::AssetCaptured { .. } => "asset_captured",
            Self::AssetSkipped { .. } => "asset_skipped",
            Self::AssetFailed { .. } => "asset_failed",
            Self::BreakerStateChanged { .. } => "breaker_state_changed",
            Self::BackpressureChanged { .. } => "backpressure_changed",
            Self::ReplicationCompleted { .. } => "replication_completed",
        }
    }
}
