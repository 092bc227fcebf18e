//! Reliability patterns for the report step
//!
//! This module provides:
//! - [`RetryPolicy`] - Fixed-delay retry for result reporting

mod retry;

pub use retry::{RetryFailure, RetryPolicy, Retryable};
