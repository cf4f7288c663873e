//! Output containment
//!
//! Local paths come from URLs chosen by the crawled site and from manifest
//! keys read back from disk; neither is trusted. `resolve_output_path` is the
//! single gate every write (and every verify read) goes through.

use std::path::{Component, Path, PathBuf};

use crate::crawl_engine::crawl_types::{ReplicaError, ReplicaResult};

/// Canonical output root plus the containment check built on it
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Build a guard for `output_root`
    ///
    /// The root is canonicalized when it exists so symlinked roots compare
    /// correctly; otherwise it is made absolute lexically.
    #[must_use]
    pub fn new(output_root: &Path) -> Self {
        let root = std::fs::canonicalize(output_root)
            .or_else(|_| std::path::absolute(output_root))
            .unwrap_or_else(|_| output_root.to_path_buf());
        Self {
            root: lexical_normalize(&root),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a root-relative candidate to an absolute path under the root
    ///
    /// Both `/` and `\` count as separators. Absolute candidates, drive-letter
    /// prefixes, and any `..` that would climb above the root are rejected, as
    /// is a candidate that resolves to the root itself. When part of the
    /// resolved path already exists below the root, its canonical form must
    /// still lie under the root so a planted symlink cannot redirect writes.
    ///
    /// # Errors
    ///
    /// Returns `ReplicaError::PathTraversal` on any violation.
    pub fn resolve_output_path(&self, candidate: &str) -> ReplicaResult<PathBuf> {
        let unified = candidate.replace('\\', "/");
        if unified.starts_with('/') || has_drive_prefix(&unified) || unified.contains('\0') {
            return Err(ReplicaError::PathTraversal(candidate.to_string()));
        }

        let mut parts: Vec<&str> = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        return Err(ReplicaError::PathTraversal(candidate.to_string()));
                    }
                }
                other => parts.push(other),
            }
        }
        if parts.is_empty() {
            return Err(ReplicaError::PathTraversal(candidate.to_string()));
        }

        let mut resolved = self.root.clone();
        resolved.extend(parts);

        self.check_existing_ancestor(&resolved, candidate)?;
        Ok(resolved)
    }

    fn check_existing_ancestor(&self, resolved: &Path, candidate: &str) -> ReplicaResult<()> {
        let mut probe = Some(resolved);
        while let Some(path) = probe {
            if !path.starts_with(&self.root) {
                // nothing below the root exists yet
                return Ok(());
            }
            if path.exists() {
                let canonical = std::fs::canonicalize(path)?;
                if canonical.starts_with(&self.root) {
                    return Ok(());
                }
                return Err(ReplicaError::PathTraversal(candidate.to_string()));
            }
            probe = path.parent();
        }
        Ok(())
    }
}

fn has_drive_prefix(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
