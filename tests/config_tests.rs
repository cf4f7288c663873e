//! Options files, builder overrides and validation

use kodegen_tools_replicator::config::{
    BreakerSettings, CompressionPolicy, ImagePolicy, ReplicationOptions,
};
use kodegen_tools_replicator::crawl_engine::ReplicaError;
use std::time::Duration;

mod common;

#[test]
fn options_file_then_overrides() {
    let dir = common::create_test_dir();
    let path = dir.path().join("replicate.json");
    std::fs::write(
        &path,
        r#"{
            "maxCrawlDepth": 4,
            "compression": "brotli",
            "imagePolicy": "webp",
            "allowedDomains": ["cdn.example.net"],
            "circuitBreaker": { "failureThreshold": 2 },
            "breakpoints": [{ "name": "tablet", "width": 768, "height": 1024 }]
        }"#,
    )
    .unwrap();

    let options = ReplicationOptions::from_json_file(&path)
        .unwrap()
        .into_builder()
        .max_crawl_depth(1)
        .build()
        .unwrap();

    assert_eq!(options.max_crawl_depth(), 1);
    assert_eq!(options.compression(), CompressionPolicy::Brotli);
    assert_eq!(options.image_policy(), ImagePolicy::Webp);
    assert_eq!(options.allowed_domains(), ["cdn.example.net".to_string()]);
    assert_eq!(
        options.circuit_breaker(),
        BreakerSettings {
            failure_threshold: 2,
            ..BreakerSettings::default()
        }
    );
    assert_eq!(options.breakpoints().len(), 1);
    assert_eq!(options.breakpoints()[0].name, "tablet");
    // untouched fields keep their defaults
    assert_eq!(options.page_concurrency(), 4);
    assert_eq!(options.retry_delay_base(), Duration::from_millis(1000));
}

#[test]
fn unreadable_or_malformed_files_are_config_errors() {
    let dir = common::create_test_dir();

    let missing = ReplicationOptions::from_json_file(&dir.path().join("absent.json"));
    assert!(matches!(missing, Err(ReplicaError::Config(_))));

    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, "{ maxCrawlDepth: ").unwrap();
    assert!(matches!(
        ReplicationOptions::from_json_file(&bad),
        Err(ReplicaError::Config(_))
    ));
}

#[test]
fn invalid_values_fail_validation() {
    let cases = [
        ReplicationOptions::builder().memory_threshold(0.0),
        ReplicationOptions::builder().memory_threshold(1.5),
        ReplicationOptions::builder().max_asset_size(0),
        ReplicationOptions::builder().request_timeout_ms(0),
        ReplicationOptions::builder().image_quality(0),
        ReplicationOptions::builder().base_asset_concurrency(0),
        ReplicationOptions::builder().circuit_breaker(BreakerSettings {
            failure_threshold: 0,
            ..BreakerSettings::default()
        }),
    ];
    for builder in cases {
        assert!(matches!(builder.build(), Err(ReplicaError::Config(_))));
    }
}

#[test]
fn ignore_robots_wins_over_earlier_concurrency() {
    let options = ReplicationOptions::builder()
        .base_asset_concurrency(32)
        .domain_asset_concurrency(8)
        .ignore_robots()
        .build()
        .unwrap();

    assert!(!options.respect_robots_txt());
    assert_eq!(options.base_asset_concurrency(), 2);
    assert_eq!(options.domain_asset_concurrency(), 1);
    assert_eq!(options.request_interval(), Some(Duration::from_secs(1)));
}

#[test]
fn policies_parse_from_cli_strings() {
    assert_eq!("AVIF".parse::<ImagePolicy>(), Ok(ImagePolicy::Avif));
    assert_eq!("off".parse::<ImagePolicy>(), Ok(ImagePolicy::None));
    assert_eq!("br".parse::<CompressionPolicy>(), Ok(CompressionPolicy::Brotli));
    assert!("gzip".parse::<CompressionPolicy>().is_err());
}

#[test]
fn options_round_trip_through_json() {
    let options = ReplicationOptions::builder()
        .incremental(true)
        .responsive(true)
        .build()
        .unwrap();
    let json = serde_json::to_value(&options).unwrap();
    assert_eq!(json["incremental"], true);
    assert_eq!(json["maxAssetSize"], 5 * 1024 * 1024);

    let back: ReplicationOptions = serde_json::from_value(json).unwrap();
    assert!(back.incremental());
    assert!(back.responsive());
}

#[test]
fn stealth_is_on_unless_disabled() {
    assert!(ReplicationOptions::default().stealth());

    let dir = common::create_test_dir();
    let path = dir.path().join("replicate.json");
    std::fs::write(&path, r#"{ "stealth": false }"#).unwrap();
    assert!(!ReplicationOptions::from_json_file(&path).unwrap().stealth());

    let options = ReplicationOptions::builder().stealth(false).build().unwrap();
    assert!(!options.stealth());
}
