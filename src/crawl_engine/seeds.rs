//! Seed discovery from robots.txt and sitemaps
//!
//! The entry URL is always a seed. When robots.txt is honoured its
//! `Sitemap:` declarations are followed, and `/sitemap.xml` is tried either
//! way. Every `<loc>` on the crawl's own origin becomes an extra seed.

use log::{debug, info, warn};
use regex::Regex;
use reqwest::Client;
use robotstxt::DefaultMatcher;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

use super::crawl_types::ReplicaResult;
use crate::security::SecurityGuard;
use crate::utils::{is_valid_url, normalize_page_url, strip_fragment};

static LOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<loc>\s*(?:<!\[CDATA\[)?\s*(.*?)\s*(?:\]\]>)?\s*</loc>")
        .expect("LOC_RE: hardcoded regex is valid")
});

/// Parsed robots.txt rules for the crawled origin
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    /// Raw body; empty allows everything
    content: String,
}

impl RobotsRules {
    #[must_use]
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Rules that allow every URL
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.content.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// Sitemap URLs declared with `Sitemap:` lines
    #[must_use]
    pub fn sitemaps(&self) -> Vec<String> {
        self.content
            .lines()
            .filter_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.trim()
                    .eq_ignore_ascii_case("sitemap")
                    .then(|| value.trim().to_string())
            })
            .filter(|value| !value.is_empty())
            .collect()
    }
}

/// Result of seed discovery
#[derive(Debug, Clone)]
pub struct Seeds {
    pub urls: BTreeSet<String>,
    pub robots: RobotsRules,
}

/// Discover the initial page set for a crawl starting at `entry`
///
/// Network failures here are never fatal: a missing robots.txt allows
/// everything and a missing sitemap adds nothing. Each fetch, body
/// included, must finish within `request_timeout`.
pub async fn discover_seeds(
    client: &Client,
    security: &SecurityGuard,
    entry: &Url,
    respect_robots: bool,
    request_timeout: Duration,
) -> ReplicaResult<Seeds> {
    let fetcher = TextFetcher {
        client,
        security,
        timeout: request_timeout,
    };
    let mut urls = BTreeSet::new();
    urls.insert(strip_fragment(entry.clone()).to_string());
    let origin = origin_prefix(entry);

    let mut robots = RobotsRules::allow_all();
    if respect_robots {
        match fetcher.fetch(&entry.join("/robots.txt")?).await {
            Some(body) => {
                robots = RobotsRules::from_content(body);
                for sitemap in robots.sitemaps() {
                    match Url::parse(&sitemap) {
                        Ok(url) => parse_sitemap(&fetcher, &url, &origin, &mut urls).await,
                        Err(e) => warn!("Ignoring malformed sitemap URL {sitemap}: {e}"),
                    }
                }
            }
            None => warn!("robots.txt unavailable for {origin}"),
        }
    }

    parse_sitemap(&fetcher, &entry.join("/sitemap.xml")?, &origin, &mut urls).await;

    Ok(Seeds { urls, robots })
}

async fn parse_sitemap(
    fetcher: &TextFetcher<'_>,
    sitemap: &Url,
    origin: &str,
    urls: &mut BTreeSet<String>,
) {
    let Some(xml) = fetcher.fetch(sitemap).await else {
        warn!("No sitemap at {sitemap}");
        return;
    };
    let before = urls.len();
    urls.extend(sitemap_locations(&xml, origin));
    info!(
        "Parsed sitemap {sitemap}: {} new URLs ({} total)",
        urls.len() - before,
        urls.len()
    );
}

/// Normalized `<loc>` values that live on `origin`
#[must_use]
pub fn sitemap_locations(xml: &str, origin: &str) -> Vec<String> {
    LOC_RE
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| normalize_page_url(&decode_entities(m.as_str())))
        .filter(|loc| loc.starts_with(origin) && is_valid_url(loc))
        .collect()
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// `scheme://host[:port]/`, the prefix every same-origin URL starts with
fn origin_prefix(url: &Url) -> String {
    format!("{}/", url.origin().ascii_serialization())
}

struct TextFetcher<'a> {
    client: &'a Client,
    security: &'a SecurityGuard,
    timeout: Duration,
}

impl TextFetcher<'_> {
    async fn fetch(&self, url: &Url) -> Option<String> {
        if let Err(e) = self.security.ensure_fetch_safe(url) {
            warn!("{e}");
            return None;
        }
        match tokio::time::timeout(self.timeout, self.fetch_body(url)).await {
            Ok(body) => body,
            Err(_) => {
                warn!("Timed out after {:?} fetching {url}", self.timeout);
                None
            }
        }
    }

    async fn fetch_body(&self, url: &Url) -> Option<String> {
        let response = match self.client.get(url.as_str()).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!("{url} answered {}", response.status());
                return None;
            }
            Err(e) => {
                debug!("Failed to fetch {url}: {e}");
                return None;
            }
        };
        response.text().await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn robots_rules_match_paths() {
        let rules = RobotsRules::from_content("User-agent: *\nDisallow: /private\n");
        assert!(rules.is_allowed("https://a.test/", "Replicator"));
        assert!(!rules.is_allowed("https://a.test/private/x", "Replicator"));
        assert!(RobotsRules::allow_all().is_allowed("https://a.test/private", "Replicator"));
    }

    #[test]
    fn sitemap_lines_are_collected() {
        let rules = RobotsRules::from_content(
            "User-agent: *\nSitemap: https://a.test/one.xml\nsitemap:https://a.test/two.xml\n",
        );
        assert_eq!(
            rules.sitemaps(),
            vec!["https://a.test/one.xml", "https://a.test/two.xml"]
        );
    }

    #[test]
    fn locations_are_filtered_to_origin() {
        let xml = r"<urlset>
            <url><loc>https://a.test/about</loc></url>
            <url><loc> https://a.test/q?x=1&amp;y=2 </loc></url>
            <url><loc><![CDATA[https://a.test/cdata]]></loc></url>
            <url><loc>https://b.test/elsewhere</loc></url>
            <url><loc>https://A.TEST:443/about#team</loc></url>
        </urlset>";
        let locs = sitemap_locations(xml, "https://a.test/");
        assert_eq!(
            locs,
            vec![
                "https://a.test/about",
                "https://a.test/q?x=1&y=2",
                "https://a.test/cdata",
                "https://a.test/about"
            ]
        );
    }

    #[tokio::test]
    async fn discovers_from_robots_and_default_sitemap() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let _robots = server
            .mock("GET", "/robots.txt")
            .with_body(format!(
                "User-agent: *\nDisallow: /admin\nSitemap: {base}/extra.xml\n"
            ))
            .create_async()
            .await;
        let _extra = server
            .mock("GET", "/extra.xml")
            .with_body(format!("<urlset><url><loc>{base}/from-robots</loc></url></urlset>"))
            .create_async()
            .await;
        let _default = server
            .mock("GET", "/sitemap.xml")
            .with_body(format!(
                "<urlset><url><loc>{base}/from-default</loc></url><url><loc>https://other.test/x</loc></url></urlset>"
            ))
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let security = SecurityGuard::new(dir.path(), true);
        let client = Client::new();
        let entry = Url::parse(&format!("{base}/")).unwrap();

        let seeds = discover_seeds(&client, &security, &entry, true, TIMEOUT).await.unwrap();
        assert!(seeds.urls.contains(&format!("{base}/")));
        assert!(seeds.urls.contains(&format!("{base}/from-robots")));
        assert!(seeds.urls.contains(&format!("{base}/from-default")));
        assert_eq!(seeds.urls.len(), 3);
        assert!(!seeds.robots.is_allowed(&format!("{base}/admin"), "Replicator"));
    }

    #[tokio::test]
    async fn unreachable_sources_leave_only_the_entry() {
        let mut server = mockito::Server::new_async().await;
        let _robots = server
            .mock("GET", "/robots.txt")
            .with_status(404)
            .create_async()
            .await;
        let _sitemap = server
            .mock("GET", "/sitemap.xml")
            .with_status(500)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let security = SecurityGuard::new(dir.path(), true);
        let entry = Url::parse(&format!("{}/start", server.url())).unwrap();

        let seeds = discover_seeds(&Client::new(), &security, &entry, true, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(seeds.urls.len(), 1);
        assert!(seeds.robots.is_allowed(&format!("{}/anything", server.url()), "Replicator"));
    }

    #[tokio::test]
    async fn private_hosts_are_not_fetched_without_opt_in() {
        let mut server = mockito::Server::new_async().await;
        let robots = server
            .mock("GET", "/robots.txt")
            .with_body("User-agent: *\nDisallow: /\n")
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let security = SecurityGuard::new(dir.path(), false);
        let entry = Url::parse(&format!("{}/", server.url())).unwrap();

        let seeds = discover_seeds(&Client::new(), &security, &entry, true, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(seeds.urls.len(), 1);
        robots.assert_async().await;
    }

    #[tokio::test]
    async fn stalled_robots_does_not_hang_discovery() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    drop(socket);
                });
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let security = SecurityGuard::new(dir.path(), true);
        let entry = Url::parse(&format!("http://{addr}/")).unwrap();

        let started = std::time::Instant::now();
        let seeds = discover_seeds(
            &Client::new(),
            &security,
            &entry,
            true,
            Duration::from_millis(200),
        )
        .await
        .unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(seeds.urls.len(), 1);
        assert!(seeds.robots.is_allowed(&format!("http://{addr}/any"), "Replicator"));
    }
}
