//! Content-addressed ledger of captured files
//!
//! `ManifestStore` is the live table mutated during a run and persisted to
//! `manifest.json`; `verify` re-hashes a finished replica independently of
//! any crawl.

pub mod store;
pub mod types;
pub mod verify;

pub use store::ManifestStore;
pub use types::{AssetEntry, Manifest, Stats, integrity_from_digest, integrity_of};
pub use verify::{EntryProblem, InvalidEntry, VerifyReport, verify};
