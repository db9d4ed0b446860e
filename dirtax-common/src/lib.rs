//! # DIRTAX Common Library
//!
//! Shared code for the direction taxonomy builder:
//! - Error type and result alias
//! - Configuration file model and loading
//! - Content fingerprints used as cache keys
//! - Atomic temp-then-rename persistence
//! - Timestamp helpers

pub mod atomic;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod time;

pub use error::{Error, Result};
