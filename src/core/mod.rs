//! The core module of the blockwise pipeline.
//!
//! This module contains the fundamental components shared by every phase:
//! - Error handling
//! - Configuration management and validation
//! - Parallel-processing policy
//!
//! It also provides re-exports of commonly used types for convenience.

pub mod config;
pub mod errors;

pub use config::{
    Backoff, BlockwiseConfig, ConfigError, ConfigValidator, ParallelPolicy, RetryPolicy,
    RunFingerprint,
};
pub use errors::{ProcessingStage, SegError, SegResult};

/// Initializes the tracing subscriber for logging.
///
/// This function sets up the tracing subscriber with environment filter and formatting layer.
/// It's typically called at the start of an application to enable logging.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}
