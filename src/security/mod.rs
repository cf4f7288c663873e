//! SSRF and path-containment policies
//!
//! `SecurityGuard` bundles the two checks the crawl applies to untrusted
//! input: where it may fetch from, and where it may write to.

pub mod path_guard;
pub mod ssrf;

use std::path::{Path, PathBuf};
use url::Url;

use crate::crawl_engine::crawl_types::{ReplicaError, ReplicaResult};

pub use path_guard::PathGuard;
pub use ssrf::{is_url_fetch_safe, is_url_str_fetch_safe};

/// Per-run security policy
#[derive(Debug, Clone)]
pub struct SecurityGuard {
    paths: PathGuard,
    allow_private_network: bool,
}

impl SecurityGuard {
    #[must_use]
    pub fn new(output_root: &Path, allow_private_network: bool) -> Self {
        Self {
            paths: PathGuard::new(output_root),
            allow_private_network,
        }
    }

    /// Canonical output root
    #[must_use]
    pub fn root(&self) -> &Path {
        self.paths.root()
    }

    /// See [`PathGuard::resolve_output_path`]
    ///
    /// # Errors
    ///
    /// Returns `ReplicaError::PathTraversal` when the candidate escapes the root.
    pub fn resolve_output_path(&self, candidate: &str) -> ReplicaResult<PathBuf> {
        self.paths.resolve_output_path(candidate)
    }

    /// SSRF policy for this run
    ///
    /// With `allow_private_network` only the scheme is checked.
    #[must_use]
    pub fn is_url_fetch_safe(&self, url: &Url) -> bool {
        if self.allow_private_network {
            matches!(url.scheme(), "http" | "https")
        } else {
            is_url_fetch_safe(url)
        }
    }

    /// Like `is_url_fetch_safe` but as a `Result` for `?` chains
    ///
    /// # Errors
    ///
    /// Returns `ReplicaError::SsrfBlocked` when the URL is refused.
    pub fn ensure_fetch_safe(&self, url: &Url) -> ReplicaResult<()> {
        if self.is_url_fetch_safe(url) {
            Ok(())
        } else {
            Err(ReplicaError::SsrfBlocked(url.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_network_opt_in() {
        let url = Url::parse("http://127.0.0.1:8080/").unwrap();
        let strict = SecurityGuard::new(Path::new("/tmp/out"), false);
        let relaxed = SecurityGuard::new(Path::new("/tmp/out"), true);
        assert!(!strict.is_url_fetch_safe(&url));
        assert!(relaxed.is_url_fetch_safe(&url));
        assert!(!relaxed.is_url_fetch_safe(&Url::parse("file:///etc/passwd").unwrap()));
        assert!(matches!(
            strict.ensure_fetch_safe(&url),
            Err(ReplicaError::SsrfBlocked(_))
        ));
    }
}
