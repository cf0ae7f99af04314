//! Dispatch of batches to the external analysis service.
//!
//! [`AnalysisService`] is the network seam: [`HttpAnalysisService`] talks
//! to the real service, tests substitute an in-process mock. The
//! [`Dispatcher`] layers the idempotent short-circuit, request validation,
//! per-exchange retry with backoff, and bounded job polling on top.

pub mod dispatcher;
pub mod error;
pub mod http;
pub mod service;

pub use dispatcher::{DispatchResult, Dispatcher, PollPolicy};
pub use error::{DispatchError, DispatchErrorKind};
pub use http::HttpAnalysisService;
pub use service::AnalysisService;
