//! Configuration management for the blockwise pipeline.
//!
//! This module provides configuration types, validation traits, and the
//! deterministic run fingerprint used to key resumable runs.

pub mod blockwise;
pub mod errors;
pub mod parallel;

pub use blockwise::{Backoff, BlockwiseConfig, RetryPolicy, RunFingerprint};
pub use errors::{ConfigError, ConfigValidator};
pub use parallel::ParallelPolicy;
