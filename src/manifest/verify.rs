//! Standalone integrity verification of a replica directory

use log::{error, info};
use serde::Serialize;
use std::path::Path;
use tokio::fs;

use super::store::ManifestStore;
use super::types::integrity_of;
use crate::crawl_engine::crawl_types::ReplicaResult;
use crate::security::PathGuard;

/// Why an entry failed verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EntryProblem {
    /// The referenced file is absent or unreadable
    Missing,
    /// The file exists but its hash differs from the stored token
    HashMismatch { expected: String, actual: String },
    /// The manifest key points outside the replica directory
    UnsafePath,
}

impl std::fmt::Display for EntryProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "file missing"),
            Self::HashMismatch { expected, actual } => {
                write!(f, "integrity mismatch (expected {expected}, found {actual})")
            }
            Self::UnsafePath => write!(f, "path escapes the replica directory"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidEntry {
    pub local_path: String,
    pub problem: EntryProblem,
}

/// Result of verifying every manifest entry
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    pub valid: usize,
    pub invalid: usize,
    pub problems: Vec<InvalidEntry>,
}

impl VerifyReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.valid + self.invalid
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.invalid == 0
    }
}

/// Recompute the hash of every entry in `{output_dir}/manifest.json`
///
/// Only `assets` keys are checked; screenshot paths nested under a page entry
/// are not part of the integrity set.
///
/// # Errors
///
/// Fails only when the manifest itself is missing or unparsable. Per-entry
/// problems are collected into the report.
pub async fn verify(output_dir: &Path) -> ReplicaResult<VerifyReport> {
    info!("Verifying integrity of {}", output_dir.display());
    let manifest = ManifestStore::read(output_dir).await?;
    let guard = PathGuard::new(output_dir);
    let mut report = VerifyReport::default();

    for (local_path, entry) in &manifest.assets {
        let problem = match guard.resolve_output_path(local_path) {
            Err(_) => Some(EntryProblem::UnsafePath),
            Ok(full) => match fs::read(&full).await {
                Err(_) => Some(EntryProblem::Missing),
                Ok(bytes) => {
                    let actual = integrity_of(&bytes);
                    (actual != entry.integrity).then(|| EntryProblem::HashMismatch {
                        expected: entry.integrity.clone(),
                        actual,
                    })
                }
            },
        };

        match problem {
            None => report.valid += 1,
            Some(problem) => {
                error!("{local_path}: {problem}");
                report.invalid += 1;
                report.problems.push(InvalidEntry {
                    local_path: local_path.clone(),
                    problem,
                });
            }
        }
    }

    info!(
        "Total: {}, Valid: {}, Invalid: {}",
        report.total(),
        report.valid,
        report.invalid
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl_engine::crawl_types::ReplicaError;
    use crate::manifest::types::AssetEntry;

    #[tokio::test]
    async fn classifies_each_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.css"), b"body{}").unwrap();
        std::fs::write(dir.path().join("bad.css"), b"tampered").unwrap();

        let store = ManifestStore::new("https://example.com");
        store.record(
            "good.css",
            AssetEntry::new("https://example.com/good.css", "text/css", 6, integrity_of(b"body{}")),
        );
        store.record(
            "bad.css",
            AssetEntry::new("https://example.com/bad.css", "text/css", 6, integrity_of(b"body{}")),
        );
        store.record(
            "gone.js",
            AssetEntry::new("https://example.com/gone.js", "text/javascript", 1, integrity_of(b";")),
        );
        store.record(
            "../outside.txt",
            AssetEntry::new("https://example.com/x", "text/plain", 1, integrity_of(b"x")),
        );
        store.save(dir.path()).await.unwrap();

        let report = verify(dir.path()).await.unwrap();
        assert_eq!(report.valid, 1);
        assert_eq!(report.invalid, 3);
        assert!(!report.is_ok());

        let problem = |path: &str| {
            report
                .problems
                .iter()
                .find(|p| p.local_path == path)
                .map(|p| p.problem.clone())
        };
        assert!(matches!(problem("bad.css"), Some(EntryProblem::HashMismatch { .. })));
        assert_eq!(problem("gone.js"), Some(EntryProblem::Missing));
        assert_eq!(problem("../outside.txt"), Some(EntryProblem::UnsafePath));
    }

    #[tokio::test]
    async fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            verify(dir.path()).await,
            Err(ReplicaError::ManifestNotFound(_))
        ));
    }
}
