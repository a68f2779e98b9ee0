//! # volseg
//!
//! Out-of-core blockwise post-processing and evaluation for volumetric
//! instance segmentation. Raw network output far larger than memory is
//! processed block by block, per-block results are stitched into a globally
//! consistent labeling, and predictions are scored against ground truth
//! with spatially-aware instance matching.
//!
//! ## Components
//!
//! - **Block planning**: partition a domain into halo-carrying blocks that
//!   exactly tile it
//! - **Blockwise execution**: a worker pool running the operator pipeline
//!   per block, with retries, all-or-nothing writes, and resumable manifests
//! - **Stitching**: union-find relabeling across block boundaries plus
//!   global size filtering
//! - **Evaluation**: blockwise overlap accumulation, R-tree candidate
//!   pruning, greedy best-IoU matching, per-class metrics
//!
//! ## Modules
//!
//! * [`core`] - errors, configuration, parallel policy
//! * [`domain`] - domains, regions, blocks
//! * [`volume`] - the chunked-array read/write capability
//! * [`planner`] - block planning
//! * [`processors`] - the post-processing operator set
//! * [`pipeline`] - executor, manifests, orchestration
//! * [`stitcher`] - cross-block relabeling
//! * [`eval`] - evaluation engine and metrics
//!
//! ## Quick Start
//!
//! ```rust
//! use volseg::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // threshold the network output, label it, drop specks under 16 voxels
//! let operators = OperatorPipeline::new(vec![
//!     Operator::Threshold(Threshold::new(0.5)),
//!     Operator::ConnectedComponents(ConnectedComponents::default()),
//!     Operator::SizeFilter(SizeFilter::new(16)),
//! ]);
//! let config = BlockwiseConfig::new().with_block_shape(vec![32, 32, 32]);
//! let pipeline = SegmentationPipeline::new(config, operators)?;
//!
//! let domain = Domain::new(vec![64, 64, 64]);
//! let source = MemoryVolume::filled(vec![64, 64, 64], 0.0f32);
//! let output = MemoryVolume::filled(vec![64, 64, 64], 0u64);
//! let store = MemoryManifestStore::new();
//!
//! let summary = pipeline.run(&domain, &source, &output, &store)?;
//! assert!(summary.is_complete());
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod domain;
pub mod eval;
pub mod pipeline;
pub mod planner;
pub mod processors;
pub mod stitcher;
pub mod volume;

/// Commonly used types, re-exported for convenience.
pub mod prelude {
    pub use crate::core::{
        Backoff, BlockwiseConfig, ParallelPolicy, RetryPolicy, SegError, SegResult,
    };
    pub use crate::domain::{Block, Domain, Region};
    pub use crate::eval::{EvaluationEngine, MetricsReport};
    pub use crate::pipeline::{
        BlockwiseExecutor, FileManifestStore, ManifestStore, MemoryManifestStore, RunManifest,
        RunSummary, SegmentationPipeline,
    };
    pub use crate::planner::BlockPlanner;
    pub use crate::processors::{
        ConnectedComponents, Connectivity, Operator, OperatorPipeline, SeededWatershed,
        SizeFilter, Threshold,
    };
    pub use crate::stitcher::{StitchReport, Stitcher};
    pub use crate::volume::{MemoryVolume, VolumeSink, VolumeSource};
}
