//! Browser teardown
//!
//! Shutdown must never fail, so every step records its error and carries on.

use chromiumoxide::Browser;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;

/// Result of cleanup operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupResult {
    /// All cleanup operations succeeded
    Success,
    /// Some cleanup operations failed, with error details
    PartialFailure(Vec<String>),
}

impl CleanupResult {
    fn from_errors(errors: Vec<String>) -> Self {
        if errors.is_empty() {
            Self::Success
        } else {
            Self::PartialFailure(errors)
        }
    }
}

/// Close the browser, reap its process, stop the CDP handler, and remove the
/// profile directory
pub async fn cleanup_browser_and_data(
    mut browser: Browser,
    handler: JoinHandle<()>,
    chrome_data_dir: PathBuf,
) -> CleanupResult {
    let mut errors = Vec::new();

    debug!(target: "replicator::cleanup", "Closing browser");
    if let Err(e) = browser.close().await {
        warn!(target: "replicator::cleanup", "Failed to close browser: {e}");
        errors.push(format!("Browser close failed: {e}"));
    }

    // reap the child so it is not left as a zombie
    debug!(target: "replicator::cleanup", "Waiting for browser process to exit");
    if let Err(e) = browser.wait().await {
        warn!(target: "replicator::cleanup", "Failed to wait for browser exit: {e}");
        errors.push(format!("Browser wait failed: {e}"));
    }

    handler.abort();

    debug!(target: "replicator::cleanup", "Removing Chrome data directory");
    if let Err(e) = remove_data_dir(&chrome_data_dir) {
        warn!(target: "replicator::cleanup", "Failed to remove Chrome data directory: {e}");
        errors.push(format!("Directory cleanup failed: {e}"));
    }

    CleanupResult::from_errors(errors)
}

fn remove_data_dir(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_reflects_errors() {
        assert_eq!(CleanupResult::from_errors(Vec::new()), CleanupResult::Success);
        assert_eq!(
            CleanupResult::from_errors(vec!["x".to_string()]),
            CleanupResult::PartialFailure(vec!["x".to_string()])
        );
    }

    #[test]
    fn missing_data_dir_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("never-created");
        assert!(remove_data_dir(&gone).is_ok());
    }
}
