//! Bounded async worker pools
//!
//! A `WorkerPool` is the "queue" of the two-tier scheduler: jobs are spawned
//! as tokio tasks immediately but only run once the pool grants them a slot.
//! Slots are limited by the concurrency limit, withheld while the pool is
//! paused, and optionally spaced by a minimum dispatch interval. An optional
//! `AdaptiveController` retunes the limit after every completed job.

use dashmap::DashMap;
use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, oneshot};
use tokio::task::AbortHandle;

use crate::utils::MemorySampler;

/// Number of recent completions the adaptive controller averages over
pub const ADAPTIVE_WINDOW: usize = 50;
/// Concurrency never drops below this
pub const ADAPTIVE_MIN_CONCURRENCY: usize = 1;
/// Concurrency never grows past this
pub const ADAPTIVE_MAX_CONCURRENCY: usize = 10;

const SLOW_LATENCY: Duration = Duration::from_secs(5);
const FAST_LATENCY: Duration = Duration::from_secs(1);
const HIGH_PRESSURE: f64 = 0.8;
const LOW_PRESSURE: f64 = 0.5;

/// Feedback loop turning latency and memory readings into a concurrency limit
pub struct AdaptiveController {
    window: Mutex<VecDeque<Duration>>,
    sampler: Arc<dyn MemorySampler>,
}

impl std::fmt::Debug for AdaptiveController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveController")
            .field("samples", &self.window.lock().len())
            .finish_non_exhaustive()
    }
}

impl AdaptiveController {
    #[must_use]
    pub fn new(sampler: Arc<dyn MemorySampler>) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(ADAPTIVE_WINDOW)),
            sampler,
        }
    }

    /// Record one completion and return the limit the pool should use next
    ///
    /// Slow averages (> 5s) or high memory pressure (> 80%) shed one slot;
    /// fast averages (< 1s) with low pressure (< 50%) add one.
    pub fn observe(&self, latency: Duration, current: usize) -> usize {
        let average = {
            let mut window = self.window.lock();
            if window.len() == ADAPTIVE_WINDOW {
                window.pop_front();
            }
            window.push_back(latency);
            let total: Duration = window.iter().sum();
            total / window.len() as u32
        };
        let pressure = self.sampler.pressure();

        if average > SLOW_LATENCY || pressure > HIGH_PRESSURE {
            current.saturating_sub(1).max(ADAPTIVE_MIN_CONCURRENCY)
        } else if average < FAST_LATENCY && pressure < LOW_PRESSURE {
            (current + 1).min(ADAPTIVE_MAX_CONCURRENCY)
        } else {
            current
        }
    }
}

#[derive(Debug)]
struct PoolState {
    limit: usize,
    active: usize,
    queued: usize,
    paused: bool,
    /// Bumped by `clear()`; jobs queued under an older generation are dropped
    generation: u64,
    last_dispatch: Option<Instant>,
    completed: u64,
}

/// Concurrency-limited pool of async jobs
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    state: Mutex<PoolState>,
    changed: Notify,
    min_interval: Option<Duration>,
    adaptive: Option<AdaptiveController>,
    tasks: DashMap<u64, AbortHandle>,
    next_task_id: AtomicU64,
}

impl WorkerPool {
    /// Create a pool running at most `concurrency` jobs at once
    #[must_use]
    pub fn new(name: impl Into<String>, concurrency: usize, min_interval: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(PoolState {
                limit: concurrency.max(1),
                active: 0,
                queued: 0,
                paused: false,
                generation: 0,
                last_dispatch: None,
                completed: 0,
            }),
            changed: Notify::new(),
            min_interval,
            adaptive: None,
            tasks: DashMap::new(),
            next_task_id: AtomicU64::new(0),
        }
    }

    /// Attach a feedback controller that retunes the limit after each job
    #[must_use]
    pub fn with_adaptive(mut self, controller: AdaptiveController) -> Self {
        self.adaptive = Some(controller);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job; it runs once a slot is free
    pub fn submit<Fut>(self: &Arc<Self>, job: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = {
            let mut s = self.state.lock();
            s.queued += 1;
            s.generation
        };
        let ticket = Ticket {
            pool: Arc::clone(self),
            generation,
            armed: true,
        };

        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let pool = Arc::clone(self);
        // the task only starts once its abort handle is registered, so its
        // own removal can never run ahead of the insert
        let (registered, wait_registered) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            if wait_registered.await.is_ok()
                && let Some(slot) = pool.acquire(ticket).await
            {
                let started = Instant::now();
                job.await;
                drop(slot);
                pool.observe(started.elapsed());
            }
            pool.tasks.remove(&id);
        });

        self.tasks.insert(id, handle.abort_handle());
        registered.send(()).ok();
    }

    async fn acquire(self: &Arc<Self>, mut ticket: Ticket) -> Option<Slot> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait = {
                let mut s = self.state.lock();
                if s.generation != ticket.generation {
                    return None;
                }
                if s.paused || s.active >= s.limit {
                    None
                } else if let (Some(interval), Some(last)) = (self.min_interval, s.last_dispatch)
                    && last.elapsed() < interval
                {
                    Some(interval - last.elapsed())
                } else {
                    s.active += 1;
                    s.queued = s.queued.saturating_sub(1);
                    s.last_dispatch = Some(Instant::now());
                    ticket.armed = false;
                    return Some(Slot {
                        pool: Arc::clone(self),
                    });
                }
            };

            match wait {
                Some(delay) => {
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = &mut notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    fn observe(&self, latency: Duration) {
        let Some(controller) = &self.adaptive else {
            return;
        };
        let current = self.concurrency();
        let next = controller.observe(latency, current);
        if next != current {
            debug!(
                "Adaptive concurrency for {}: {} -> {} (latency {:?})",
                self.name, current, next, latency
            );
            self.set_concurrency(next);
        }
    }

    /// Stop granting new slots; running jobs continue
    pub fn pause(&self) {
        self.state.lock().paused = true;
        self.changed.notify_waiters();
    }

    pub fn resume(&self) {
        self.state.lock().paused = false;
        self.changed.notify_waiters();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Drop every job that has not started yet, returning how many were dropped
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut s = self.state.lock();
            s.generation += 1;
            std::mem::take(&mut s.queued)
        };
        self.changed.notify_waiters();
        dropped
    }

    /// Abort every spawned job, running or waiting
    pub fn abort_all(&self) {
        self.clear();
        for entry in &self.tasks {
            entry.value().abort();
        }
        self.tasks.clear();
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.state.lock().limit
    }

    pub fn set_concurrency(&self, limit: usize) {
        self.state.lock().limit = limit.max(1);
        self.changed.notify_waiters();
    }

    /// Jobs currently holding a slot
    #[must_use]
    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    /// Jobs waiting for a slot
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.lock().queued
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        self.state.lock().completed
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        let s = self.state.lock();
        s.active == 0 && s.queued == 0
    }

    /// Resolve once nothing is running or waiting
    pub async fn on_idle(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Queued-job accounting that survives the job being aborted while waiting
struct Ticket {
    pool: Arc<WorkerPool>,
    generation: u64,
    armed: bool,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut s = self.pool.state.lock();
            if s.generation == self.generation {
                s.queued = s.queued.saturating_sub(1);
            }
        }
        self.pool.changed.notify_waiters();
    }
}

/// A granted slot; dropping it frees the slot even when the job is aborted
struct Slot {
    pool: Arc<WorkerPool>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        {
            let mut s = self.pool.state.lock();
            s.active = s.active.saturating_sub(1);
            s.completed += 1;
        }
        self.pool.changed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FixedPressure(f64);

    impl MemorySampler for FixedPressure {
        fn pressure(&self) -> f64 {
            self.0
        }
    }

    #[tokio::test]
    async fn never_exceeds_concurrency() {
        let pool = Arc::new(WorkerPool::new("test", 2, None));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        pool.on_idle().await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.completed(), 8);
    }

    #[tokio::test]
    async fn paused_pool_holds_jobs_until_resumed() {
        let pool = Arc::new(WorkerPool::new("test", 4, None));
        let done = Arc::new(AtomicUsize::new(0));
        pool.pause();

        for _ in 0..3 {
            let done = Arc::clone(&done);
            pool.submit(async move {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(done.load(Ordering::SeqCst), 0);
        assert_eq!(pool.queued(), 3);

        pool.resume();
        pool.on_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn clear_drops_waiting_jobs() {
        let pool = Arc::new(WorkerPool::new("test", 1, None));
        let done = Arc::new(AtomicUsize::new(0));
        pool.pause();
        for _ in 0..5 {
            let done = Arc::clone(&done);
            pool.submit(async move {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(pool.clear(), 5);
        pool.resume();
        pool.on_idle().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(done.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn min_interval_spaces_dispatches() {
        let pool = Arc::new(WorkerPool::new("polite", 4, Some(Duration::from_millis(40))));
        let started = Instant::now();
        for _ in 0..3 {
            pool.submit(async {});
        }
        pool.on_idle().await;
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn abort_all_releases_slots() {
        let pool = Arc::new(WorkerPool::new("test", 1, None));
        pool.submit(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        pool.submit(async {});
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.active(), 1);

        pool.abort_all();
        tokio::time::timeout(Duration::from_secs(1), pool.on_idle())
            .await
            .expect("pool should drain after abort");
    }

    #[test]
    fn adaptive_controller_moves_within_bounds() {
        let relaxed = AdaptiveController::new(Arc::new(FixedPressure(0.1)));
        assert_eq!(relaxed.observe(Duration::from_millis(100), 3), 4);
        assert_eq!(relaxed.observe(Duration::from_millis(100), 10), 10);

        let squeezed = AdaptiveController::new(Arc::new(FixedPressure(0.9)));
        assert_eq!(squeezed.observe(Duration::from_millis(100), 3), 2);
        assert_eq!(squeezed.observe(Duration::from_millis(100), 1), 1);

        let slow = AdaptiveController::new(Arc::new(FixedPressure(0.1)));
        assert_eq!(slow.observe(Duration::from_secs(8), 5), 4);

        let middling = AdaptiveController::new(Arc::new(FixedPressure(0.6)));
        assert_eq!(middling.observe(Duration::from_millis(100), 5), 5);
    }

    #[tokio::test]
    async fn adaptive_pool_grows_on_fast_jobs() {
        let pool = Arc::new(
            WorkerPool::new("adaptive", 2, None)
                .with_adaptive(AdaptiveController::new(Arc::new(FixedPressure(0.0)))),
        );
        for _ in 0..4 {
            pool.submit(async {});
        }
        pool.on_idle().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(pool.concurrency() > 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn finished_jobs_leave_no_abort_handles() {
        let pool = Arc::new(WorkerPool::new("test", 8, None));
        for _ in 0..500 {
            pool.submit(async {});
        }
        pool.on_idle().await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while !pool.tasks.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("every finished task unregisters itself");
    }
}
