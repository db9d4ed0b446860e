//! dirtax-builder library interface
//!
//! Builds a two-level taxonomy of research directions for each axis:
//! records are collected from researcher profiles, embedded through a
//! content-addressed cache, clustered, labeled by a completion service and
//! grouped under coarse categories.

pub mod assembler;
pub mod batch;
pub mod clustering;
pub mod collector;
pub mod config;
pub mod embedding_cache;
pub mod error;
pub mod hierarchy;
pub mod labeling;
pub mod models;
pub mod services;
pub mod utils;
pub mod workflow;

pub use crate::error::{BuildError, BuildResult};
