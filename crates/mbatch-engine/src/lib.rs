//! Incremental batch-effect pipeline engine.
//!
//! Scans a source tree for sample batches, reconciles them against the
//! index catalogue, dispatches new and changed batches to the analysis
//! service, archives the returned artifacts into a versioned results tree,
//! and keeps the catalogue current. The catalogue can be rebuilt from the
//! results tree alone.

#![warn(clippy::pedantic)]

pub mod archive;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod errors;
pub mod lock;
pub mod orchestrator;
pub mod reconcile;
pub mod reindex;
pub mod report;
pub mod result;
pub mod scanner;

// Re-export public API for convenience
pub use errors::PipelineError;
pub use orchestrator::{
    check_pipeline, execute_pipeline, execute_pipeline_with, execute_pipeline_with_store,
    reindex_pipeline,
};
pub use result::{CheckResult, ReindexResult, RunOutcome};
