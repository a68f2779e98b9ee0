//! Minimum-size filtering of instances.

use serde::{Deserialize, Serialize};

/// Declares a minimum voxel count for instances to survive.
///
/// This operator is a block-level no-op: a component near a block boundary
/// can look arbitrarily small from inside one block, so removal decisions
/// are only valid over true global component sizes. The stitcher enforces
/// the threshold after final relabeling; this declaration carries it through
/// the pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeFilter {
    /// Minimum voxel count for a global component to be kept.
    pub min_voxels: u64,

    /// Per-axis halo override. Filtering itself needs no context.
    #[serde(default)]
    pub halo: Option<usize>,
}

impl SizeFilter {
    /// Creates a size filter with the given global minimum.
    pub fn new(min_voxels: u64) -> Self {
        Self {
            min_voxels,
            halo: None,
        }
    }
}
