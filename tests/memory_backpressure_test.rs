//! Memory pressure holds queued work until the monitor releases it

use kodegen_tools_replicator::config::ReplicationOptions;
use kodegen_tools_replicator::crawl_engine::{DomainScheduler, MemoryMonitor, WorkerPool};
use kodegen_tools_replicator::utils::MemorySampler;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct DialSampler(AtomicU64);

impl DialSampler {
    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::SeqCst);
    }
}

impl MemorySampler for DialSampler {
    fn pressure(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }
}

#[tokio::test]
async fn queued_jobs_wait_out_high_pressure() {
    let sampler = Arc::new(DialSampler::default());
    let pages = Arc::new(WorkerPool::new("pages", 2, None));
    let assets = Arc::new(DomainScheduler::new(
        "example.com",
        &ReplicationOptions::default(),
        sampler.clone(),
        None,
    ));

    let monitor = MemoryMonitor::new(
        Duration::from_millis(10),
        0.85,
        sampler.clone(),
        vec![pages.clone(), assets.clone()],
    );
    monitor.start();

    sampler.set(0.99);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(monitor.is_throttling());

    let ran = Arc::new(AtomicUsize::new(0));
    for pool in [pages.clone(), assets.queue_for("example.com")] {
        let ran = ran.clone();
        pool.submit(async move {
            ran.fetch_add(1, Ordering::SeqCst);
        });
    }

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(pages.queued(), 1);

    sampler.set(0.10);
    tokio::time::timeout(Duration::from_secs(5), async {
        pages.on_idle().await;
        assets.wait_idle().await;
    })
    .await
    .expect("queues drain once pressure drops");

    assert_eq!(ran.load(Ordering::SeqCst), 2);
    assert!(!monitor.is_throttling());
    monitor.stop();
}
