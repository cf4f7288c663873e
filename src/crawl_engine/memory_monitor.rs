//! Memory-aware global backpressure
//!
//! The monitor samples memory pressure on a fixed interval. Above the
//! threshold it pauses every registered queue; once pressure falls back to or
//! below the threshold it resumes them. Start and stop are idempotent.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::domain_scheduler::DomainScheduler;
use super::worker_pool::WorkerPool;
use crate::crawl_events::{ReplicationEvent, ReplicationEventBus};
use crate::utils::MemorySampler;

/// Something the monitor can pause and resume
pub trait Backpressure: Send + Sync {
    fn pause_all(&self);
    fn resume_all(&self);
}

impl Backpressure for WorkerPool {
    fn pause_all(&self) {
        self.pause();
    }

    fn resume_all(&self) {
        self.resume();
    }
}

impl Backpressure for DomainScheduler {
    fn pause_all(&self) {
        DomainScheduler::pause_all(self);
    }

    fn resume_all(&self) {
        DomainScheduler::resume_all(self);
    }
}

pub struct MemoryMonitor {
    interval: Duration,
    threshold: f64,
    sampler: Arc<dyn MemorySampler>,
    targets: Vec<Arc<dyn Backpressure>>,
    throttled: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    events: Option<ReplicationEventBus>,
}

impl MemoryMonitor {
    #[must_use]
    pub fn new(
        interval: Duration,
        threshold: f64,
        sampler: Arc<dyn MemorySampler>,
        targets: Vec<Arc<dyn Backpressure>>,
    ) -> Self {
        Self {
            interval,
            threshold,
            sampler,
            targets,
            throttled: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, bus: ReplicationEventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Start sampling; a second call while running is a no-op
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Memory monitor already running");
            return;
        }

        let interval = self.interval;
        let threshold = self.threshold;
        let sampler = Arc::clone(&self.sampler);
        let targets = self.targets.clone();
        let throttled = Arc::clone(&self.throttled);
        let events = self.events.clone();

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let pressure = sampler.pressure();

                if pressure > threshold {
                    if !throttled.swap(true, Ordering::SeqCst) {
                        warn!(
                            "Memory pressure {:.1}% above {:.1}%, pausing all queues",
                            pressure * 100.0,
                            threshold * 100.0
                        );
                        for target in &targets {
                            target.pause_all();
                        }
                        publish(events.as_ref(), true, pressure);
                    }
                } else if throttled.swap(false, Ordering::SeqCst) {
                    info!(
                        "Memory pressure back to {:.1}%, resuming all queues",
                        pressure * 100.0
                    );
                    for target in &targets {
                        target.resume_all();
                    }
                    publish(events.as_ref(), false, pressure);
                }
            }
        }));
        debug!("Memory monitor started ({:?} interval)", self.interval);
    }

    /// Stop sampling; safe to call when not running
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            debug!("Memory monitor stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Whether the monitor currently holds the queues paused
    #[must_use]
    pub fn is_throttling(&self) -> bool {
        self.throttled.load(Ordering::SeqCst)
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn publish(events: Option<&ReplicationEventBus>, paused: bool, pressure: f64) {
    if let Some(bus) = events {
        bus.publish(ReplicationEvent::BackpressureChanged {
            paused,
            pressure,
            timestamp: chrono::Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicationOptions;
    use std::sync::atomic::AtomicU64;

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
    async fn pauses_and_resumes_every_queue() {
        let sampler = Arc::new(DialSampler::default());
        let pages = Arc::new(WorkerPool::new("pages", 2, None));
        let domains = Arc::new(DomainScheduler::new(
            "example.com",
            &ReplicationOptions::default(),
            sampler.clone(),
            None,
        ));
        let cdn = domains.queue_for("cdn.example.net");

        let monitor = MemoryMonitor::new(
            Duration::from_millis(20),
            0.85,
            sampler.clone(),
            vec![pages.clone(), domains.clone()],
        );
        monitor.start();

        sampler.set(0.95);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(monitor.is_throttling());
        assert!(pages.is_paused());
        assert!(cdn.is_paused());
        assert!(domains.queue_for("late.example.org").is_paused());

        sampler.set(0.40);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!monitor.is_throttling());
        assert!(!pages.is_paused());
        assert!(!cdn.is_paused());

        monitor.stop();
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let monitor = MemoryMonitor::new(
            Duration::from_millis(10),
            0.85,
            Arc::new(DialSampler::default()),
            Vec::new(),
        );
        monitor.start();
        monitor.start();
        assert!(monitor.is_running());
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
        monitor.start();
        assert!(monitor.is_running());
        monitor.stop();
    }
}
