//! Asset capture and file output
//!
//! The pipeline fetches sub-resources through the per-domain scheduler,
//! streams them through content-type transforms, optional brotli
//! compression, a size-capped hasher and an atomic file writer.

pub mod asset_pipeline;
mod http_client;
pub mod transforms;
mod writer;

pub use asset_pipeline::{AssetPipeline, FetchOutcome};
pub use http_client::build_http_client;
pub use transforms::{Transform, essence, is_compressible, optimize_svg};
pub use writer::{StagedWriter, WrittenFile, write_atomic};
