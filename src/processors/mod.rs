//! Post-processing operators for raw network output.
//!
//! Each operator consumes one in-memory block (core + halo) and produces one
//! in-memory block of the same shape, with no shared state across
//! invocations, so blocks can be processed concurrently. Operators compose
//! into an [`OperatorPipeline`], which declares the combined halo the
//! planner must provide.
//!
//! # Modules
//!
//! * `threshold` - foreground masking by intensity cutoff
//! * `connected` - connected-component labeling within a block
//! * `watershed` - seeded watershed flooding
//! * `size_filter` - minimum-size declaration (enforced globally by the stitcher)
//! * `types` - block data and connectivity types

pub mod connected;
pub mod size_filter;
pub mod threshold;
pub mod types;
pub mod watershed;

pub use connected::{label_components, ConnectedComponents};
pub use size_filter::SizeFilter;
pub use threshold::Threshold;
pub use types::{BlockData, BlockDataKind, Connectivity};
pub use watershed::SeededWatershed;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::core::config::ConfigError;
use crate::core::{SegError, SegResult};

/// The closed set of post-processing operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operator {
    /// Boolean mask from an intensity cutoff.
    Threshold(Threshold),
    /// Block-local instance ids for connected foreground regions.
    ConnectedComponents(ConnectedComponents),
    /// Marker-seeded flooding of the intensity landscape.
    SeededWatershed(SeededWatershed),
    /// Global minimum-size declaration.
    SizeFilter(SizeFilter),
}

impl Operator {
    /// Short name for logs and error context.
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Threshold(_) => "threshold",
            Operator::ConnectedComponents(_) => "connected_components",
            Operator::SeededWatershed(_) => "seeded_watershed",
            Operator::SizeFilter(_) => "size_filter",
        }
    }

    /// The halo this operator requires, per axis. Overridable per operator
    /// in configuration; the defaults follow what each algorithm actually
    /// reads: thresholding is pointwise, labeling needs one voxel of
    /// adjacency context, flooding needs ridge context beyond that.
    pub fn halo(&self) -> usize {
        let (override_halo, default_halo) = match self {
            Operator::Threshold(op) => (op.halo, 0),
            Operator::ConnectedComponents(op) => (op.halo, 1),
            Operator::SeededWatershed(op) => (op.halo, 2),
            Operator::SizeFilter(op) => (op.halo, 0),
        };
        override_halo.unwrap_or(default_halo)
    }

    /// The data kind this operator consumes.
    pub fn input_kind(&self) -> BlockDataKind {
        match self {
            Operator::Threshold(_) => BlockDataKind::Intensity,
            Operator::ConnectedComponents(_) => BlockDataKind::Mask,
            Operator::SeededWatershed(_) => BlockDataKind::Intensity,
            Operator::SizeFilter(_) => BlockDataKind::Labels,
        }
    }

    /// The data kind this operator produces.
    pub fn output_kind(&self) -> BlockDataKind {
        match self {
            Operator::Threshold(_) => BlockDataKind::Mask,
            Operator::ConnectedComponents(_) => BlockDataKind::Labels,
            Operator::SeededWatershed(_) => BlockDataKind::Labels,
            Operator::SizeFilter(_) => BlockDataKind::Labels,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Operator::Threshold(op) => op.validate(),
            Operator::SeededWatershed(op) => op.validate(),
            Operator::ConnectedComponents(_) | Operator::SizeFilter(_) => Ok(()),
        }
    }

    /// Applies this operator to one block.
    pub fn apply(&self, input: BlockData) -> SegResult<BlockData> {
        if input.kind() != self.input_kind() {
            return Err(SegError::invalid_input(format!(
                "operator {} expects {} input, got {}",
                self.name(),
                self.input_kind(),
                input.kind()
            )));
        }
        let output = match (self, input) {
            (Operator::Threshold(op), BlockData::Intensity(a)) => BlockData::Mask(op.apply(&a)),
            (Operator::ConnectedComponents(op), BlockData::Mask(a)) => {
                BlockData::Labels(op.apply(&a))
            }
            (Operator::SeededWatershed(op), BlockData::Intensity(a)) => {
                BlockData::Labels(op.apply(&a))
            }
            (Operator::SizeFilter(_), labels @ BlockData::Labels(_)) => labels,
            _ => unreachable!("input kind checked above"),
        };
        Ok(output)
    }
}

/// An ordered list of operators applied sequentially to each block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorPipeline {
    operators: Vec<Operator>,
}

impl OperatorPipeline {
    /// Creates a pipeline from an ordered operator list.
    pub fn new(operators: Vec<Operator>) -> Self {
        Self { operators }
    }

    /// The configured operators, in application order.
    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    /// The halo the planner must provide: the maximum over all operators.
    pub fn required_halo(&self) -> usize {
        self.operators.iter().map(Operator::halo).max().unwrap_or(0)
    }

    /// The connectivity of the labeling step, if any. The stitcher uses the
    /// same neighborhood for cross-boundary adjacency.
    pub fn connectivity(&self) -> Connectivity {
        self.operators
            .iter()
            .find_map(|op| match op {
                Operator::ConnectedComponents(c) => Some(c.connectivity),
                Operator::SeededWatershed(w) => Some(w.connectivity),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// The global minimum component size declared by a size-filter step, if
    /// any. Enforced by the stitcher after final relabeling.
    pub fn size_filter_threshold(&self) -> Option<u64> {
        self.operators.iter().find_map(|op| match op {
            Operator::SizeFilter(filter) => Some(filter.min_voxels),
            _ => None,
        })
    }

    /// Validates operator parameters and the data-kind chain: the pipeline
    /// consumes intensity and must end in labels.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operators.is_empty() {
            return Err(ConfigError::InvalidConfig {
                message: "operator pipeline must not be empty".to_string(),
            });
        }
        let mut kind = BlockDataKind::Intensity;
        for op in &self.operators {
            op.validate()?;
            if op.input_kind() != kind {
                return Err(ConfigError::InvalidConfig {
                    message: format!(
                        "operator {} expects {} input but the pipeline produces {} here",
                        op.name(),
                        op.input_kind(),
                        kind
                    ),
                });
            }
            kind = op.output_kind();
        }
        if kind != BlockDataKind::Labels {
            return Err(ConfigError::InvalidConfig {
                message: format!("pipeline must end in labels, ends in {kind}"),
            });
        }
        Ok(())
    }

    /// Runs every operator over one block of intensity data, producing
    /// block-local labels.
    pub fn apply(&self, intensity: ArrayD<f32>) -> SegResult<ArrayD<u64>> {
        let mut data = BlockData::Intensity(intensity);
        for op in &self.operators {
            data = op.apply(data)?;
        }
        match data {
            BlockData::Labels(labels) => Ok(labels),
            other => Err(SegError::invalid_input(format!(
                "pipeline produced {} instead of labels",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn threshold_then_label() -> OperatorPipeline {
        OperatorPipeline::new(vec![
            Operator::Threshold(Threshold::new(0.5)),
            Operator::ConnectedComponents(ConnectedComponents::default()),
        ])
    }

    #[test]
    fn combined_halo_is_the_maximum() {
        let pipeline = threshold_then_label();
        assert_eq!(pipeline.required_halo(), 1);

        let with_watershed = OperatorPipeline::new(vec![
            Operator::SeededWatershed(SeededWatershed::new(0.8, 0.5)),
            Operator::SizeFilter(SizeFilter::new(10)),
        ]);
        assert_eq!(with_watershed.required_halo(), 2);
    }

    #[test]
    fn halo_override_wins() {
        let mut threshold = Threshold::new(0.5);
        threshold.halo = Some(3);
        let pipeline = OperatorPipeline::new(vec![
            Operator::Threshold(threshold),
            Operator::ConnectedComponents(ConnectedComponents::default()),
        ]);
        assert_eq!(pipeline.required_halo(), 3);
    }

    #[test]
    fn kind_chain_is_validated() {
        assert!(threshold_then_label().validate().is_ok());

        // labeling without a mask first
        let bad = OperatorPipeline::new(vec![Operator::ConnectedComponents(
            ConnectedComponents::default(),
        )]);
        assert!(bad.validate().is_err());

        // ends in a mask, not labels
        let unfinished =
            OperatorPipeline::new(vec![Operator::Threshold(Threshold::new(0.5))]);
        assert!(unfinished.validate().is_err());

        let empty = OperatorPipeline::new(vec![]);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn applies_operators_in_order() {
        let intensity = ArrayD::from_shape_vec(
            IxDyn(&[2, 3]),
            vec![0.9f32, 0.1, 0.8, 0.9, 0.1, 0.7],
        )
        .unwrap();
        let labels = threshold_then_label().apply(intensity).unwrap();
        // left column connected vertically; right column separate
        assert_eq!(labels[[0, 0]], labels[[1, 0]]);
        assert_ne!(labels[[0, 2]], 0);
        assert_ne!(labels[[0, 0]], labels[[0, 2]]);
        assert_eq!(labels[[0, 1]], 0);
    }

    #[test]
    fn pipeline_round_trips_through_json() {
        let pipeline = OperatorPipeline::new(vec![
            Operator::Threshold(Threshold::new(0.4)),
            Operator::ConnectedComponents(ConnectedComponents::new(Connectivity::Full)),
            Operator::SizeFilter(SizeFilter::new(16)),
        ]);
        let json = serde_json::to_string(&pipeline).unwrap();
        let back: OperatorPipeline = serde_json::from_str(&json).unwrap();
        assert_eq!(back.operators().len(), 3);
        assert_eq!(back.size_filter_threshold(), Some(16));
    }
}
