//! Per-domain asset scheduling
//!
//! Every hostname the crawl touches gets its own worker pool and circuit
//! breaker, created lazily on first reference and kept for the rest of the
//! run. A slow or failing CDN therefore only ever blocks its own queue.

use dashmap::DashMap;
use log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::circuit_breaker::CircuitBreaker;
use super::worker_pool::{AdaptiveController, WorkerPool};
use crate::config::{BreakerSettings, ReplicationOptions};
use crate::crawl_events::ReplicationEventBus;
use crate::utils::MemorySampler;

/// Lazily populated arena of (pool, breaker) pairs keyed by hostname
pub struct DomainScheduler {
    base_host: String,
    base_concurrency: usize,
    domain_concurrency: usize,
    min_interval: Option<Duration>,
    adaptive: bool,
    sampler: Arc<dyn MemorySampler>,
    breaker_settings: BreakerSettings,
    operation_timeout: Duration,
    pools: DashMap<String, Arc<WorkerPool>>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    paused: AtomicBool,
    events: Option<ReplicationEventBus>,
}

impl DomainScheduler {
    /// Build a scheduler for a crawl rooted at `base_host`
    #[must_use]
    pub fn new(
        base_host: impl Into<String>,
        options: &ReplicationOptions,
        sampler: Arc<dyn MemorySampler>,
        events: Option<ReplicationEventBus>,
    ) -> Self {
        Self {
            base_host: base_host.into().to_ascii_lowercase(),
            base_concurrency: options.base_asset_concurrency(),
            domain_concurrency: options.domain_asset_concurrency(),
            min_interval: options.request_interval(),
            adaptive: options.adaptive_concurrency(),
            sampler,
            breaker_settings: options.circuit_breaker(),
            operation_timeout: options.timeout(),
            pools: DashMap::new(),
            breakers: DashMap::new(),
            paused: AtomicBool::new(false),
            events,
        }
    }

    /// Worker pool for `hostname`, created on first use
    ///
    /// The crawl's own origin gets the base concurrency, everything else the
    /// per-domain concurrency.
    pub fn queue_for(&self, hostname: &str) -> Arc<WorkerPool> {
        let host = hostname.to_ascii_lowercase();
        if let Some(pool) = self.pools.get(&host) {
            return Arc::clone(pool.value());
        }

        Arc::clone(
            self.pools
                .entry(host.clone())
                .or_insert_with(|| {
                    let concurrency = if host == self.base_host {
                        self.base_concurrency
                    } else {
                        self.domain_concurrency
                    };
                    let mut pool = WorkerPool::new(host.clone(), concurrency, self.min_interval);
                    if self.adaptive {
                        pool = pool.with_adaptive(AdaptiveController::new(Arc::clone(&self.sampler)));
                    }
                    if self.paused.load(Ordering::SeqCst) {
                        pool.pause();
                    }
                    debug!("Created asset queue for {host} (concurrency {concurrency})");
                    Arc::new(pool)
                })
                .value(),
        )
    }

    /// Circuit breaker for `hostname`, created on first use
    pub fn breaker_for(&self, hostname: &str) -> Arc<CircuitBreaker> {
        let host = hostname.to_ascii_lowercase();
        if let Some(breaker) = self.breakers.get(&host) {
            return Arc::clone(breaker.value());
        }

        Arc::clone(
            self.breakers
                .entry(host.clone())
                .or_insert_with(|| {
                    let mut breaker =
                        CircuitBreaker::new(host.clone(), self.breaker_settings, self.operation_timeout);
                    if let Some(bus) = &self.events {
                        breaker = breaker.with_events(bus.clone());
                    }
                    Arc::new(breaker)
                })
                .value(),
        )
    }

    /// Snapshot of every pool created so far
    #[must_use]
    pub fn pools(&self) -> Vec<Arc<WorkerPool>> {
        self.pools.iter().map(|e| Arc::clone(e.value())).collect()
    }

    #[must_use]
    pub fn domain_count(&self) -> usize {
        self.pools.len()
    }

    /// Pause every existing pool and any created from now on
    pub fn pause_all(&self) {
        self.paused.store(true, Ordering::SeqCst);
        for pool in self.pools() {
            pool.pause();
        }
    }

    pub fn resume_all(&self) {
        self.paused.store(false, Ordering::SeqCst);
        for pool in self.pools() {
            pool.resume();
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Drop queued jobs everywhere, abandoning running ones
    pub fn shutdown(&self) {
        let mut dropped = 0;
        for pool in self.pools() {
            dropped += pool.queued();
            pool.abort_all();
        }
        if dropped > 0 {
            info!("Dropped {dropped} queued asset jobs across {} domains", self.domain_count());
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pools().iter().all(|p| p.is_idle())
    }

    /// Resolve once every pool, including ones created while waiting, is idle
    pub async fn wait_idle(&self) {
        loop {
            let pools = self.pools();
            for pool in &pools {
                pool.on_idle().await;
            }
            if self.domain_count() == pools.len() && self.is_idle() {
                return;
            }
        }
    }
}
