//! Utility modules for dirtax-builder

pub mod retry;

pub use retry::{RetryPolicy, Retryable};
