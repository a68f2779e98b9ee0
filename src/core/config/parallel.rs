//! Shared parallel processing configuration types.

use serde::{Deserialize, Serialize};

/// Centralized configuration for parallel processing behavior across the
/// blockwise pipeline.
///
/// Small workloads are processed sequentially: spinning up the worker pool
/// for a handful of blocks costs more than it saves, so each threshold below
/// selects sequential execution when the item count is at or under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelPolicy {
    /// Maximum number of worker threads.
    /// If None, rayon will use the default thread pool size (typically number of CPU cores).
    #[serde(default)]
    pub max_threads: Option<usize>,

    /// Threshold for the number of blocks to process sequentially (<= this uses sequential).
    /// Default: 1 (a single-block run never pays for the pool)
    #[serde(default = "ParallelPolicy::default_block_threshold")]
    pub block_threshold: usize,

    /// Threshold for the number of accumulation regions the evaluation engine
    /// processes sequentially (<= this uses sequential).
    /// Default: 4
    #[serde(default = "ParallelPolicy::default_accumulation_threshold")]
    pub accumulation_threshold: usize,
}

impl ParallelPolicy {
    fn default_block_threshold() -> usize {
        1
    }

    fn default_accumulation_threshold() -> usize {
        4
    }

    /// Creates a new ParallelPolicy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of worker threads.
    pub fn with_max_threads(mut self, threads: Option<usize>) -> Self {
        self.max_threads = threads;
        self
    }

    /// Set the sequential/parallel block count threshold.
    pub fn with_block_threshold(mut self, threshold: usize) -> Self {
        self.block_threshold = threshold;
        self
    }

    /// Whether a workload of `count` items should run in parallel under this
    /// policy's block threshold.
    pub fn should_parallelize_blocks(&self, count: usize) -> bool {
        count > self.block_threshold
    }

    /// Builds a rayon thread pool honoring `max_threads`, or None when the
    /// global pool should be used as-is.
    pub fn build_pool(&self) -> Result<Option<rayon::ThreadPool>, rayon::ThreadPoolBuildError> {
        match self.max_threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()?;
                Ok(Some(pool))
            }
            None => Ok(None),
        }
    }
}

impl Default for ParallelPolicy {
    fn default() -> Self {
        Self {
            max_threads: None,
            block_threshold: Self::default_block_threshold(),
            accumulation_threshold: Self::default_accumulation_threshold(),
        }
    }
}
