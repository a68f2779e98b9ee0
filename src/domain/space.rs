//! The global index space of a volumetric array.

use serde::{Deserialize, Serialize};

use super::region::Region;

/// Default physical voxel edge length in nanometres. All challenge volumes
/// are resampled to this scale.
pub const DEFAULT_VOXEL_SIZE_NM: f64 = 8.0;

/// The full index space of the volume being processed.
///
/// A domain is immutable for a given run: it fixes the array shape, a global
/// offset into the parent dataset, and the physical voxel size mapping index
/// space to nanometres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    shape: Vec<usize>,
    offset: Vec<usize>,
    voxel_size: Vec<f64>,
}

impl Domain {
    /// Creates a domain at the origin with the challenge-standard 8 nm
    /// isotropic voxel size.
    pub fn new(shape: Vec<usize>) -> Self {
        let ndim = shape.len();
        Self {
            shape,
            offset: vec![0; ndim],
            voxel_size: vec![DEFAULT_VOXEL_SIZE_NM; ndim],
        }
    }

    /// Set the global offset of this domain within its parent dataset.
    pub fn with_offset(mut self, offset: Vec<usize>) -> Self {
        assert_eq!(offset.len(), self.shape.len());
        self.offset = offset;
        self
    }

    /// Set the per-axis physical voxel size in nanometres.
    pub fn with_voxel_size(mut self, voxel_size: Vec<f64>) -> Self {
        assert_eq!(voxel_size.len(), self.shape.len());
        self.voxel_size = voxel_size;
        self
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Per-axis extents.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Global offset within the parent dataset.
    pub fn offset(&self) -> &[usize] {
        &self.offset
    }

    /// Per-axis physical voxel size in nanometres.
    pub fn voxel_size(&self) -> &[f64] {
        &self.voxel_size
    }

    /// Total voxel count.
    pub fn num_voxels(&self) -> usize {
        self.shape.iter().product()
    }

    /// The region covering the whole domain, in domain-local coordinates.
    pub fn region(&self) -> Region {
        Region::from_shape(self.shape.clone())
    }
}
