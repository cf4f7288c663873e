//! Core types for replication runs.
//!
//! This module contains the error taxonomy shared by every component plus the
//! small value types that flow through the page queue.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Error type for replication operations
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("Path escapes output root: {0}")]
    PathTraversal(String),

    #[error("Blocked potentially unsafe URL: {0}")]
    SsrfBlocked(String),

    #[error("Fetch failed for {url}: {reason}")]
    FetchFailure { url: String, reason: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Asset {url} exceeded maximum size of {limit} bytes")]
    MaxSizeExceeded { url: String, limit: u64 },

    #[error("Request aborted after {timeout:?}: {url}")]
    RequestAborted { url: String, timeout: Duration },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Circuit breaker is OPEN for {domain}")]
    CircuitOpen { domain: String },

    #[error("Manifest corrupt at {path:?}: {reason}")]
    ManifestCorrupt { path: PathBuf, reason: String },

    #[error("Manifest not found at {0:?}")]
    ManifestNotFound(PathBuf),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fatal: {0}")]
    Fatal(String),
}

impl ReplicaError {
    /// Whether the retry loop must stop after this error
    ///
    /// Size overruns and aborted requests would fail identically on every
    /// attempt, and security rejections are deterministic.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::MaxSizeExceeded { .. }
                | Self::RequestAborted { .. }
                | Self::PathTraversal(_)
                | Self::SsrfBlocked(_)
        )
    }

    pub(crate) fn fetch(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::FetchFailure {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<anyhow::Error> for ReplicaError {
    fn from(err: anyhow::Error) -> Self {
        // {:#} keeps the context chain
        Self::Fatal(format!("{err:#}"))
    }
}

/// Convenience alias for Result with `ReplicaError`
pub type ReplicaResult<T> = Result<T, ReplicaError>;

/// Represents an item in the page queue with URL and depth tracking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageTask {
    pub url: String,
    pub depth: u32,
}

/// How a single page visit ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Rendered, rewritten and persisted under the given local path
    Captured { local_path: String },
    /// Server answered 304 to the conditional request
    NotModified,
    /// robots.txt disallows the URL; skipped without counting as a failure
    RobotsDisallowed,
    /// Refused by the SSRF policy
    Blocked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(
            ReplicaError::MaxSizeExceeded {
                url: "https://a.test/x".into(),
                limit: 1
            }
            .is_terminal()
        );
        assert!(
            ReplicaError::RequestAborted {
                url: "https://a.test/x".into(),
                timeout: Duration::from_secs(1)
            }
            .is_terminal()
        );
        assert!(!ReplicaError::Timeout(Duration::from_secs(1)).is_terminal());
        assert!(
            !ReplicaError::CircuitOpen {
                domain: "a.test".into()
            }
            .is_terminal()
        );
        assert!(!ReplicaError::fetch("https://a.test/x", "boom").is_terminal());
    }
}
