//! Full replication of a two-resource site through a real browser

mod common;

use common::{TINY_PNG, create_asset_mock, create_test_dir, create_test_html, local_options};
use kodegen_tools_replicator::manifest::{ManifestStore, integrity_of, verify};
use kodegen_tools_replicator::{ImagePolicy, Replicator};

#[tokio::test]
#[ignore] // Requires browser installation
async fn replicates_page_and_image() {
    let mut server = mockito::Server::new_async().await;
    let html = create_test_html("", r#"<h1>Home</h1><img src="/img/dot.png" alt="dot">"#);
    let _page = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(&html)
        .create_async()
        .await;
    let _img = create_asset_mock(&mut server, "/img/dot.png", "image/png", TINY_PNG).await;

    let dir = create_test_dir();
    let options = local_options()
        .page_concurrency(1)
        .image_policy(ImagePolicy::None)
        .build()
        .unwrap();

    let replicator = Replicator::new(options);
    let stats = replicator
        .replicate(&format!("{}/", server.url()), dir.path())
        .await
        .unwrap();

    assert_eq!(stats.crawled_pages, 1);
    assert_eq!(stats.total_assets, 1);
    assert_eq!(stats.failed_assets, 0);

    let index = std::fs::read_to_string(dir.path().join("index.html")).unwrap();
    assert!(index.contains(r#"src="img/dot.png""#));
    assert_eq!(std::fs::read(dir.path().join("img/dot.png")).unwrap(), TINY_PNG);

    let manifest = ManifestStore::read(dir.path()).await.unwrap();
    assert_eq!(manifest.assets.len(), 2);
    for (path, entry) in &manifest.assets {
        let bytes = std::fs::read(dir.path().join(path)).unwrap();
        assert_eq!(entry.integrity, integrity_of(&bytes), "{path}");
    }
    assert_eq!(manifest.assets["index.html"].content_type, "text/html");

    assert!(verify(dir.path()).await.unwrap().is_ok());

    // second shutdown is a no-op
    replicator.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires browser installation
async fn incremental_rerun_skips_unchanged_assets() {
    let mut server = mockito::Server::new_async().await;
    let html = create_test_html("", r#"<img src="/img/dot.png">"#);
    let _page = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(&html)
        .create_async()
        .await;
    let _fresh = server
        .mock("GET", "/img/dot.png")
        .match_header("if-none-match", mockito::Matcher::Missing)
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_header("etag", "\"dot-1\"")
        .with_body(TINY_PNG)
        .create_async()
        .await;
    let _unchanged = server
        .mock("GET", "/img/dot.png")
        .match_header("if-none-match", "\"dot-1\"")
        .with_status(304)
        .create_async()
        .await;

    let dir = create_test_dir();
    let url = format!("{}/", server.url());
    let options = local_options()
        .page_concurrency(1)
        .image_policy(ImagePolicy::None)
        .incremental(true);

    Replicator::new(options.clone().build().unwrap())
        .replicate(&url, dir.path())
        .await
        .unwrap();
    let second = Replicator::new(options.build().unwrap())
        .replicate(&url, dir.path())
        .await
        .unwrap();

    assert_eq!(second.total_assets, 0);
    assert_eq!(second.skipped_assets, 1);
    let manifest = ManifestStore::read(dir.path()).await.unwrap();
    assert!(manifest.assets.contains_key("img/dot.png"));
    assert!(verify(dir.path()).await.unwrap().is_ok());
}

#[tokio::test]
#[ignore] // Requires browser installation
async fn missing_page_is_counted_as_failed() {
    let mut server = mockito::Server::new_async().await;
    let html = create_test_html("", r#"<a href="/gone">gone</a>"#);
    let _page = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(&html)
        .create_async()
        .await;
    let _gone = server
        .mock("GET", "/gone")
        .with_status(404)
        .with_body("not found")
        .create_async()
        .await;

    let dir = create_test_dir();
    let options = local_options()
        .page_concurrency(1)
        .image_policy(ImagePolicy::None)
        .build()
        .unwrap();
    let stats = Replicator::new(options)
        .replicate(&format!("{}/", server.url()), dir.path())
        .await
        .unwrap();

    assert_eq!(stats.crawled_pages, 1);
    assert_eq!(stats.failed_pages, 1);
    assert!(!dir.path().join("gone.html").exists());

    let manifest = ManifestStore::read(dir.path()).await.unwrap();
    assert_eq!(manifest.failed_urls, vec![format!("{}/gone", server.url())]);
    assert_eq!(manifest.stats.failed_pages, 1);
}
