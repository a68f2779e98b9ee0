//! Configuration error types and validation traits.

use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error indicating that a block shape is invalid.
    #[error("invalid block shape: {message}")]
    InvalidBlockShape { message: String },

    /// Error indicating that a halo is invalid for the given domain.
    #[error("invalid halo: {message}")]
    InvalidHalo { message: String },

    /// Error indicating that a configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Error indicating that validation failed.
    #[error("validation failed: {message}")]
    ValidationFailed { message: String },
}

impl From<ConfigError> for crate::core::SegError {
    fn from(err: ConfigError) -> Self {
        crate::core::SegError::Config {
            message: err.to_string(),
        }
    }
}

/// A trait for validating configuration parameters.
///
/// Implemented by configuration types that must be checked before any block
/// is processed. Validation failures are fatal and surface as
/// [`ConfigError`](ConfigError) before work starts.
pub trait ConfigValidator {
    /// Validates the configuration.
    ///
    /// # Returns
    ///
    /// A Result indicating success or a ConfigError if validation fails.
    fn validate(&self) -> Result<(), ConfigError>;

    /// Returns the recommended default configuration.
    fn get_defaults() -> Self
    where
        Self: Sized;

    /// Validates a block shape: every axis extent must be non-zero.
    fn validate_block_shape(&self, shape: &[usize]) -> Result<(), ConfigError> {
        if shape.is_empty() {
            return Err(ConfigError::InvalidBlockShape {
                message: "block shape must have at least one axis".to_string(),
            });
        }
        if let Some(axis) = shape.iter().position(|&s| s == 0) {
            return Err(ConfigError::InvalidBlockShape {
                message: format!("axis {axis} has zero extent"),
            });
        }
        Ok(())
    }

    /// Validates a fraction-valued parameter such as an IoU threshold.
    fn validate_unit_interval(&self, name: &str, value: f64) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&value) || value.is_nan() {
            return Err(ConfigError::ValidationFailed {
                message: format!("{name} must be in [0, 1], got {value}"),
            });
        }
        Ok(())
    }
}
