//! Surfacer - Web application input-surface discovery and probing
//!
//! Crawls and guesses the reachable pages of one target origin, builds the
//! model of its input points, then injects exploit vectors into every point
//! and reports the anomalies the responses show.

pub mod app;
pub mod discovery;
pub mod error;
pub mod fuzzer;
pub mod http;
pub mod lists;
pub mod pipeline;
pub mod reporting;
pub mod scanner;
pub mod scope;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use error::*;
pub use pipeline::{Cancellation, Pipeline, TestInputs};
