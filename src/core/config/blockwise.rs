//! Top-level configuration for blockwise runs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{ConfigError, ConfigValidator};
use super::parallel::ParallelPolicy;
use crate::core::SegResult;

/// Delay strategy between retries of a transient storage failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed { delay_ms: u64 },
    /// Delay doubles per retry, capped.
    Exponential { base_delay_ms: u64, cap_ms: u64 },
}

impl Backoff {
    /// Delay before retry number `retry` (0 = first retry).
    pub fn delay_for(&self, retry: usize) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential {
                base_delay_ms,
                cap_ms,
            } => {
                let shift = retry.min(16) as u32;
                let delay = base_delay_ms.saturating_mul(1u64 << shift);
                Duration::from_millis(delay.min(cap_ms))
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base_delay_ms: 50,
            cap_ms: 5_000,
        }
    }
}

/// Retry envelope for transient I/O failures on a single block.
///
/// Permanent errors (malformed input, shape mismatches) are never retried
/// regardless of this policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    #[serde(default = "RetryPolicy::default_max_retries")]
    pub max_retries: usize,

    /// Delay strategy between retries.
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    fn default_max_retries() -> usize {
        2
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            backoff: Backoff::default(),
        }
    }
}

/// Configuration surface consumed by the blockwise pipeline core.
///
/// Owned externally (experiment configuration loading is out of scope); this
/// type only defines the shape of what the core consumes, with defaults that
/// match the challenge conventions (64-voxel cubic chunks).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockwiseConfig {
    /// Block core shape, one extent per axis.
    #[serde(default = "BlockwiseConfig::default_block_shape")]
    pub block_shape: Vec<usize>,

    /// Retry envelope for transient storage failures.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Worker pool sizing and sequential/parallel thresholds.
    #[serde(default)]
    pub parallel: ParallelPolicy,

    /// Minimum IoU for the evaluation engine to accept a match.
    #[serde(default = "BlockwiseConfig::default_min_iou")]
    pub min_iou: f64,

    /// Minimum voxel count for a global component to survive size filtering.
    /// Zero disables the filter.
    #[serde(default)]
    pub min_component_size: u64,

    /// Width of the reserved global-id range per block. Local labels from
    /// block `b` map to `b * id_stride + local` before merging, so this must
    /// exceed the largest local label count any single block can produce.
    #[serde(default = "BlockwiseConfig::default_id_stride")]
    pub id_stride: u64,
}

impl BlockwiseConfig {
    fn default_block_shape() -> Vec<usize> {
        vec![64, 64, 64]
    }

    fn default_min_iou() -> f64 {
        0.5
    }

    fn default_id_stride() -> u64 {
        1 << 24
    }

    /// Creates a configuration with challenge defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the block core shape.
    pub fn with_block_shape(mut self, shape: Vec<usize>) -> Self {
        self.block_shape = shape;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the parallel policy.
    pub fn with_parallel(mut self, parallel: ParallelPolicy) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set the minimum matching IoU.
    pub fn with_min_iou(mut self, min_iou: f64) -> Self {
        self.min_iou = min_iou;
        self
    }

    /// Set the minimum global component size.
    pub fn with_min_component_size(mut self, min_voxels: u64) -> Self {
        self.min_component_size = min_voxels;
        self
    }
}

impl Default for BlockwiseConfig {
    fn default() -> Self {
        Self {
            block_shape: Self::default_block_shape(),
            retry: RetryPolicy::default(),
            parallel: ParallelPolicy::default(),
            min_iou: Self::default_min_iou(),
            min_component_size: 0,
            id_stride: Self::default_id_stride(),
        }
    }
}

impl ConfigValidator for BlockwiseConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_block_shape(&self.block_shape)?;
        self.validate_unit_interval("min_iou", self.min_iou)?;
        if self.id_stride == 0 {
            return Err(ConfigError::InvalidConfig {
                message: "id_stride must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Deterministic identifier for one run configuration.
///
/// Two runs share a fingerprint exactly when they agree on the domain, the
/// block shape, the halo, and the operator pipeline. The run manifest is
/// keyed by this value, so a resume against a changed configuration is
/// rejected instead of silently mixing block layouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFingerprint(String);

impl RunFingerprint {
    /// Computes the fingerprint from the serialized run inputs.
    pub fn compute<D, P>(
        domain: &D,
        block_shape: &[usize],
        halo: &[usize],
        pipeline: &P,
    ) -> SegResult<Self>
    where
        D: Serialize,
        P: Serialize,
    {
        let mut hasher = DefaultHasher::new();
        serde_json::to_string(domain)?.hash(&mut hasher);
        block_shape.hash(&mut hasher);
        halo.hash(&mut hasher);
        serde_json::to_string(pipeline)?.hash(&mut hasher);
        Ok(Self(format!("{:016x}", hasher.finish())))
    }

    /// The fingerprint as a filesystem-safe string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let backoff = Backoff::Exponential {
            base_delay_ms: 50,
            cap_ms: 300,
        };
        assert_eq!(backoff.delay_for(0), Duration::from_millis(50));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(300));
        assert_eq!(backoff.delay_for(20), Duration::from_millis(300));
    }

    #[test]
    fn default_config_validates() {
        assert!(BlockwiseConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_id_stride_rejected() {
        let mut config = BlockwiseConfig::default();
        config.id_stride = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn fingerprint_tracks_inputs() {
        let a = RunFingerprint::compute(&"domain-a", &[64, 64], &[1, 1], &"ops").unwrap();
        let same = RunFingerprint::compute(&"domain-a", &[64, 64], &[1, 1], &"ops").unwrap();
        let other = RunFingerprint::compute(&"domain-a", &[32, 32], &[1, 1], &"ops").unwrap();
        assert_eq!(a, same);
        assert_ne!(a, other);
    }
}
