//! Index catalogue persistence for the MBatch pipeline.
//!
//! Provides the [`IndexStore`] trait, the in-memory [`IndexCatalogue`],
//! a [`FileIndexStore`] that keeps a flat tab-separated index and a JSON
//! catalogue in step, and a [`MemoryIndexStore`] for tests.

#![warn(clippy::pedantic)]

pub mod atomic;
pub mod backend;
pub mod catalogue;
pub mod error;
pub mod file;
pub mod memory;
pub mod tabular;

pub use backend::IndexStore;
pub use catalogue::{BatchHistory, IndexCatalogue};
pub use error::StateError;
pub use file::{FileIndexStore, IndexPaths};
pub use memory::MemoryIndexStore;
