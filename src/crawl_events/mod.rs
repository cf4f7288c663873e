//! Replication event system
//!
//! Components publish `ReplicationEvent`s through a shared broadcast bus;
//! callers observe a run by subscribing instead of polling state.

pub mod bus;
pub mod types;

pub use bus::{DEFAULT_EVENT_CAPACITY, ReplicationEventBus};
pub use types::{BreakerPhase, ReplicationEvent};
