//! Capture a small set of assets, then verify the replica from disk alone

mod common;

use common::{TINY_PNG, create_asset_mock, create_test_dir, local_options, pipeline_fixture, test_url};
use kodegen_tools_replicator::manifest::{EntryProblem, ManifestStore, verify};
use kodegen_tools_replicator::{CompressionPolicy, ImagePolicy};

async fn capture_site(server: &mut mockito::Server, dir: &std::path::Path) -> ManifestStore {
    let _css = create_asset_mock(server, "/css/site.css", "text/css", b"body { color: red; }").await;
    let _img = create_asset_mock(server, "/img/dot.png", "image/png", TINY_PNG).await;
    let _js = create_asset_mock(server, "/app.js", "application/javascript", b"let a = 1;").await;

    let options = local_options()
        .compression(CompressionPolicy::Brotli)
        .image_policy(ImagePolicy::None)
        .build()
        .unwrap();
    let fx = pipeline_fixture(server, dir, options, ManifestStore::new(server.url()));
    for path in ["/css/site.css", "/img/dot.png", "/app.js"] {
        assert!(fx.pipeline.capture(&test_url(server, path)));
    }
    fx.drain().await;
    fx.manifest.save(dir).await.unwrap();

    ManifestStore::read(dir)
        .await
        .map(|manifest| {
            let store = ManifestStore::new(manifest.source_url.clone());
            for (path, entry) in manifest.assets {
                store.record(path, entry);
            }
            store
        })
        .unwrap()
}

#[tokio::test]
async fn fresh_replica_verifies_clean() {
    let mut server = mockito::Server::new_async().await;
    let dir = create_test_dir();
    let store = capture_site(&mut server, dir.path()).await;

    assert_eq!(store.len(), 3);
    assert!(store.entry("css/site.css.br").is_some());
    assert!(store.entry("app.js.br").is_some());
    // binary content is stored as-is
    assert!(store.entry("img/dot.png").is_some());

    let report = verify(dir.path()).await.unwrap();
    assert_eq!(report.total(), 3);
    assert_eq!(report.valid, 3);
    assert!(report.is_ok());
}

#[tokio::test]
async fn tampered_file_is_the_only_failure() {
    let mut server = mockito::Server::new_async().await;
    let dir = create_test_dir();
    capture_site(&mut server, dir.path()).await;

    std::fs::write(dir.path().join("img/dot.png"), b"not a png").unwrap();

    let report = verify(dir.path()).await.unwrap();
    assert_eq!(report.valid, 2);
    assert_eq!(report.invalid, 1);
    assert!(!report.is_ok());
    assert_eq!(report.problems.len(), 1);
    assert_eq!(report.problems[0].local_path, "img/dot.png");
    assert!(matches!(
        report.problems[0].problem,
        EntryProblem::HashMismatch { .. }
    ));
}

#[tokio::test]
async fn deleted_file_is_reported_missing() {
    let mut server = mockito::Server::new_async().await;
    let dir = create_test_dir();
    capture_site(&mut server, dir.path()).await;

    std::fs::remove_file(dir.path().join("app.js.br")).unwrap();

    let report = verify(dir.path()).await.unwrap();
    assert_eq!(report.invalid, 1);
    assert_eq!(report.problems[0].problem, EntryProblem::Missing);
}
