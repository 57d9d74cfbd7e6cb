//! Retry and recovery primitives

pub mod backoff;

pub use backoff::{Backoff, RetryPolicy};
