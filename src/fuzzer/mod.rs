//! Fuzzer module
//!
//! Replays every discovered input point with each exploit vector and streams
//! the exchanges to the detector as they complete.

pub mod injector;
pub mod vectors;

pub use injector::{Exchange, Injector};
pub use vectors::{infer_category, Vector, VectorSet};
