//! Crawl Engine Module
//!
//! Scheduling, resilience and orchestration for replication runs: the
//! per-domain worker pools and circuit breakers, memory backpressure, the
//! browser-driven page renderer and the orchestrator that ties them together.

pub mod circuit_breaker;
pub mod cleanup;
pub mod crawl_types;
pub mod domain_scheduler;
pub mod memory_monitor;
pub mod orchestrator;
pub mod page_processor;
pub mod page_timeout;
pub mod seeds;
pub mod worker_pool;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use crawl_types::{PageOutcome, PageTask, ReplicaError, ReplicaResult};
pub use domain_scheduler::DomainScheduler;
pub use memory_monitor::{Backpressure, MemoryMonitor};
pub use orchestrator::Replicator;
pub use page_processor::{PageRenderer, PageReport};
pub use seeds::{RobotsRules, Seeds, discover_seeds};
pub use worker_pool::{AdaptiveController, WorkerPool};
