//! Intensity thresholding.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::core::config::ConfigError;

/// Converts an intensity block into a boolean foreground mask:
/// `mask = input >= cutoff`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Threshold {
    /// Foreground cutoff applied to the intensity landscape.
    pub cutoff: f32,

    /// Per-axis halo override. Thresholding is pointwise, so the default is 0.
    #[serde(default)]
    pub halo: Option<usize>,
}

impl Threshold {
    /// Creates a threshold operator with the given cutoff.
    pub fn new(cutoff: f32) -> Self {
        Self { cutoff, halo: None }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.cutoff.is_nan() {
            return Err(ConfigError::InvalidConfig {
                message: "threshold cutoff must not be NaN".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn apply(&self, intensity: &ArrayD<f32>) -> ArrayD<u8> {
        intensity.mapv(|v| u8::from(v >= self.cutoff))
    }
}
