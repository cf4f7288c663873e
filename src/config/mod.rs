//! Configuration module for replication runs
//!
//! This module provides `ReplicationOptions` and its builder, with validation
//! and the defaults every run starts from.

// Sub-modules
pub mod builder;
pub mod getters;
pub mod types;

// Re-exports for public API
pub use builder::ReplicationOptionsBuilder;
pub use types::{
    BreakerSettings, Breakpoint, CompressionPolicy, ImagePolicy, ReplicationOptions, Viewport,
};
