//! Shared MBatch pipeline model types.
//!
//! Pure data used by the catalogue store, the engine, and the analysis
//! service boundary. Kept in its own crate so the state and engine crates
//! can share them without circular dependencies.

#![warn(clippy::pedantic)]

pub mod batch;
pub mod index;
pub mod report;
pub mod wire;

pub use batch::{Batch, BatchKey, Fingerprint};
pub use index::{EntryStatus, IndexEntry, RunSource, RunVersion};
pub use report::{ReportNote, Severity};
