//! Error types for the blockwise segmentation pipeline.
//!
//! This module defines the error taxonomy used across the crate: configuration
//! errors surfaced before any work starts, transient storage errors that are
//! retried by the executor, per-block failures that are recorded without
//! aborting sibling blocks, and fatal stitching/evaluation inconsistencies
//! that abort their phase.

use thiserror::Error;

/// Stage of the pipeline in which a processing error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Reading an input region from the source volume.
    BlockRead,
    /// Applying the operator pipeline to an in-memory block.
    OperatorApply,
    /// Writing a block's core region to the output volume.
    BlockWrite,
    /// Cross-block relabeling.
    Stitching,
    /// Overlap accumulation or matching.
    Evaluation,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::BlockRead => write!(f, "block read"),
            ProcessingStage::OperatorApply => write!(f, "operator apply"),
            ProcessingStage::BlockWrite => write!(f, "block write"),
            ProcessingStage::Stitching => write!(f, "stitching"),
            ProcessingStage::Evaluation => write!(f, "evaluation"),
        }
    }
}

/// Errors produced by the blockwise pipeline.
#[derive(Error, Debug)]
pub enum SegError {
    /// Invalid domain/block/halo/pipeline combination. Fatal; detected before
    /// any block is processed.
    #[error("configuration: {message}")]
    Config {
        /// A message describing the configuration problem.
        message: String,
    },

    /// Error indicating invalid input data (malformed labels, shape mismatch
    /// between a region request and the returned array). Never retried.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// A message describing the invalid input.
        message: String,
    },

    /// A storage read or write failed in a way that may succeed on retry.
    /// The executor retries these up to the configured limit.
    #[error("transient i/o during {stage}: {context}")]
    TransientIo {
        /// The stage in which the failure occurred.
        stage: ProcessingStage,
        /// Additional context about the failure.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A specific block could not be completed after exhausting retries.
    /// Recorded in the run manifest; sibling blocks continue.
    #[error("block {block} failed after {attempts} attempt(s)")]
    BlockFailed {
        /// Linear index of the failed block.
        block: usize,
        /// Number of attempts made, including the first.
        attempts: usize,
        /// The error from the final attempt.
        #[source]
        source: Box<SegError>,
    },

    /// The overlap comparison found a physically impossible adjacency,
    /// e.g. missing block output or a label outside any reserved id range.
    /// Fatal; aborts the stitching phase.
    #[error("stitch inconsistency: {message}")]
    StitchInconsistency {
        /// The specific inconsistency detected.
        message: String,
    },

    /// The evaluation engine could not compare the two volumes.
    /// Fatal; aborts the evaluation phase.
    #[error("evaluation: {message}")]
    Evaluation {
        /// A message describing the problem.
        message: String,
    },

    /// Generic processing error with stage context.
    #[error("{stage} failed: {context}")]
    Processing {
        /// The stage in which the error occurred.
        stage: ProcessingStage,
        /// Additional context about the error.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// IO error outside block read/write paths (manifest persistence).
    #[error("io")]
    Io(#[from] std::io::Error),

    /// Array shape error from tensor operations.
    #[error("shape")]
    Shape(#[from] ndarray::ShapeError),

    /// Manifest or report (de)serialization error.
    #[error("serialization")]
    Serde(#[from] serde_json::Error),
}

/// Convenient result alias for pipeline operations.
pub type SegResult<T> = Result<T, SegError>;

impl SegError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a transient I/O error for a storage read.
    pub fn transient_read(
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TransientIo {
            stage: ProcessingStage::BlockRead,
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a transient I/O error for a storage write.
    pub fn transient_write(
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TransientIo {
            stage: ProcessingStage::BlockWrite,
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a stitch-inconsistency error.
    pub fn stitch_inconsistency(message: impl Into<String>) -> Self {
        Self::StitchInconsistency {
            message: message.into(),
        }
    }

    /// Creates an evaluation error.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Creates a processing error for the operator-apply stage.
    pub fn operator_apply(
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            stage: ProcessingStage::OperatorApply,
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Whether the executor should retry the operation that produced this
    /// error. Only transient storage failures are retriable; everything else
    /// is treated as permanent.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::Interrupted, "socket");
        let err = SegError::transient_read("chunk (0, 0, 0)", io);
        assert!(err.is_transient());

        assert!(!SegError::config("bad block shape").is_transient());
        assert!(!SegError::invalid_input("label out of range").is_transient());
    }

    #[test]
    fn block_failure_carries_final_attempt() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "store");
        let inner = SegError::transient_write("core region", io);
        let err = SegError::BlockFailed {
            block: 7,
            attempts: 3,
            source: Box::new(inner),
        };
        let message = err.to_string();
        assert!(message.contains("block 7"));
        assert!(message.contains("3 attempt"));
    }
}
