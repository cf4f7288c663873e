//! Timeout wrapper for browser page operations
//!
//! CDP calls can hang forever on a wedged renderer; every page step goes
//! through `with_page_timeout` so a stuck page fails instead of stalling its
//! worker slot.

use std::future::Future;
use std::time::Duration;

use super::crawl_types::{ReplicaError, ReplicaResult};

/// Run `operation` with a deadline, naming it in the error
///
/// # Returns
/// * `Ok(T)` - Operation completed successfully
/// * `Err(ReplicaError::Browser)` - The operation failed or the deadline passed
pub async fn with_page_timeout<F, T, E>(
    operation: F,
    timeout: Duration,
    operation_name: &str,
) -> ReplicaResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ReplicaError::Browser(format!("{operation_name} failed: {e}"))),
        Err(_) => Err(ReplicaError::Browser(format!(
            "{operation_name} timeout after {timeout:?}"
        ))),
    }
}
