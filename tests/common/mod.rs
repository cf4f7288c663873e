//! Test utilities and helper functions for the replicator test suite

use dashmap::DashMap;
use kodegen_tools_replicator::content_saver::{AssetPipeline, build_http_client};
use kodegen_tools_replicator::crawl_engine::DomainScheduler;
use kodegen_tools_replicator::manifest::ManifestStore;
use kodegen_tools_replicator::utils::ProcessMemorySampler;
use kodegen_tools_replicator::{ReplicationOptions, SecurityGuard};
use mockito::{Mock, Server};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Creates a temporary directory for test output
#[allow(dead_code)]
pub fn create_test_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

/// Creates a test HTML document with specified head and body content
#[allow(dead_code)]
pub fn create_test_html(head: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Test</title>
    {head}
</head>
<body>
    {body}
</body>
</html>"#
    )
}

/// Options suitable for crawling a mockito server on loopback
#[allow(dead_code)]
pub fn local_options() -> kodegen_tools_replicator::ReplicationOptionsBuilder {
    ReplicationOptions::builder()
        .allow_private_network(true)
        .retry_delay_base_ms(1)
        .request_timeout_ms(5_000)
        .timeout_ms(5_000)
}

/// Everything an asset capture needs, wired against a temp output dir
#[allow(dead_code)]
pub struct PipelineFixture {
    pub pipeline: Arc<AssetPipeline>,
    pub scheduler: Arc<DomainScheduler>,
    pub manifest: Arc<ManifestStore>,
    pub url_table: Arc<DashMap<String, String>>,
}

#[allow(dead_code)]
impl PipelineFixture {
    /// Wait for every domain queue to drain
    pub async fn drain(&self) {
        tokio::time::timeout(Duration::from_secs(20), self.scheduler.wait_idle())
            .await
            .expect("asset queues did not drain");
    }
}

/// Build a pipeline for `server`, optionally resuming from `manifest`
#[allow(dead_code)]
pub fn pipeline_fixture(
    server: &Server,
    output: &Path,
    options: ReplicationOptions,
    manifest: ManifestStore,
) -> PipelineFixture {
    let base = url::Url::parse(&server.url()).expect("mockito url parses");
    pipeline_fixture_at(&base, output, options, manifest)
}

/// Build a pipeline whose crawl host is the host of `base`
#[allow(dead_code)]
pub fn pipeline_fixture_at(
    base: &url::Url,
    output: &Path,
    options: ReplicationOptions,
    manifest: ManifestStore,
) -> PipelineFixture {
    let host = base.host_str().expect("mockito url has a host").to_string();
    let options = Arc::new(options);

    let client = build_http_client(&options).expect("client builds");
    let security = Arc::new(SecurityGuard::new(output, options.allow_private_network()));
    let scheduler = Arc::new(DomainScheduler::new(
        host.clone(),
        &options,
        Arc::new(ProcessMemorySampler),
        None,
    ));
    let manifest = Arc::new(manifest);
    let url_table = Arc::new(DashMap::new());
    let pipeline = Arc::new(AssetPipeline::new(
        &host,
        Arc::clone(&options),
        client,
        security,
        Arc::clone(&scheduler),
        Arc::clone(&manifest),
        Arc::clone(&url_table),
        None,
    ));

    PipelineFixture {
        pipeline,
        scheduler,
        manifest,
        url_table,
    }
}

/// Creates a mock endpoint that returns a body with a content type
#[allow(dead_code)]
pub async fn create_asset_mock(server: &mut Server, path: &str, content_type: &str, body: &[u8]) -> Mock {
    server
        .mock("GET", path)
        .with_status(200)
        .with_header("content-type", content_type)
        .with_body(body)
        .create_async()
        .await
}

/// TCP listener that accepts connections and never answers
///
/// Returns the base URL and a counter of accepted connections.
#[allow(dead_code)]
pub async fn stalled_server() -> (url::Url, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("listener address");
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                drop(socket);
            });
        }
    });
    let base = url::Url::parse(&format!("http://{addr}/")).expect("listener url parses");
    (base, accepted)
}

/// Creates a sample robots.txt for testing
#[allow(dead_code)]
pub fn create_robots_txt(disallow_paths: &[&str]) -> String {
    let mut content = String::from("User-agent: *\n");
    for path in disallow_paths {
        content.push_str(&format!("Disallow: {path}\n"));
    }
    content
}

/// Helper to create test URLs
#[allow(dead_code)]
pub fn test_url(server: &Server, path: &str) -> url::Url {
    url::Url::parse(&format!("{}{}", server.url(), path)).expect("test url parses")
}

/// A minimal valid PNG (1x1, transparent)
#[allow(dead_code)]
pub const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];
