//! HTTP client used for robots.txt, sitemaps and assets

use reqwest::Client;
use reqwest::redirect::{Attempt, Policy};
use std::time::Duration;

use crate::config::ReplicationOptions;
use crate::crawl_engine::crawl_types::{ReplicaError, ReplicaResult};
use crate::security::is_url_fetch_safe;
use crate::utils::constants::MAX_REDIRECTS;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the shared client
///
/// Redirects are followed up to `MAX_REDIRECTS` hops, and every hop is put
/// through the SSRF check again so a public URL cannot bounce the crawler onto
/// an internal address.
pub fn build_http_client(options: &ReplicationOptions) -> ReplicaResult<Client> {
    let allow_private = options.allow_private_network();
    let policy = Policy::custom(move |attempt: Attempt<'_>| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("too many redirects (max {MAX_REDIRECTS})"));
        }
        let safe = if allow_private {
            matches!(attempt.url().scheme(), "http" | "https")
        } else {
            is_url_fetch_safe(attempt.url())
        };
        if safe {
            attempt.follow()
        } else {
            let blocked = attempt.url().to_string();
            attempt.error(ReplicaError::SsrfBlocked(blocked))
        }
    });

    Client::builder()
        .user_agent(options.user_agent())
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(policy)
        .build()
        .map_err(|e| ReplicaError::Fatal(format!("Failed to build HTTP client: {e}")))
}
