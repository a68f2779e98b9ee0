//! Type definitions used across the processors module.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// The kind of array flowing between operators in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDataKind {
    /// Raw network output or a feature map (f32).
    Intensity,
    /// Boolean foreground mask (u8, 0 or 1).
    Mask,
    /// Instance labels (u64, 0 is background).
    Labels,
}

impl std::fmt::Display for BlockDataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockDataKind::Intensity => write!(f, "intensity"),
            BlockDataKind::Mask => write!(f, "mask"),
            BlockDataKind::Labels => write!(f, "labels"),
        }
    }
}

/// One in-memory block (core + halo) as it moves through the pipeline.
#[derive(Debug, Clone)]
pub enum BlockData {
    /// Raw network output or a feature map.
    Intensity(ArrayD<f32>),
    /// Boolean foreground mask.
    Mask(ArrayD<u8>),
    /// Block-local instance labels.
    Labels(ArrayD<u64>),
}

impl BlockData {
    /// The kind tag of this data.
    pub fn kind(&self) -> BlockDataKind {
        match self {
            BlockData::Intensity(_) => BlockDataKind::Intensity,
            BlockData::Mask(_) => BlockDataKind::Mask,
            BlockData::Labels(_) => BlockDataKind::Labels,
        }
    }

    /// The array shape.
    pub fn shape(&self) -> &[usize] {
        match self {
            BlockData::Intensity(a) => a.shape(),
            BlockData::Mask(a) => a.shape(),
            BlockData::Labels(a) => a.shape(),
        }
    }
}

/// Neighborhood structure used for connectivity-sensitive operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Face neighbors only (6-connectivity in 3D). The conservative default.
    #[default]
    Faces,
    /// Face, edge, and corner neighbors (26-connectivity in 3D).
    Full,
}

impl Connectivity {
    /// All neighbor offsets for an `ndim`-dimensional array.
    pub fn neighbor_offsets(&self, ndim: usize) -> Vec<Vec<isize>> {
        match self {
            Connectivity::Faces => {
                let mut offsets = Vec::with_capacity(2 * ndim);
                for d in 0..ndim {
                    for step in [-1isize, 1] {
                        let mut offset = vec![0isize; ndim];
                        offset[d] = step;
                        offsets.push(offset);
                    }
                }
                offsets
            }
            Connectivity::Full => {
                let mut offsets = Vec::new();
                let mut current = vec![-1isize; ndim];
                loop {
                    if current.iter().any(|&c| c != 0) {
                        offsets.push(current.clone());
                    }
                    // odometer over {-1, 0, 1}^ndim
                    let mut d = ndim;
                    loop {
                        if d == 0 {
                            return offsets;
                        }
                        d -= 1;
                        if current[d] < 1 {
                            current[d] += 1;
                            break;
                        }
                        current[d] = -1;
                    }
                }
            }
        }
    }

    /// Neighbor offsets that precede the current voxel in row-major scan
    /// order (first non-zero component is negative). Used by the first pass
    /// of connected-component labeling.
    pub(crate) fn backward_offsets(&self, ndim: usize) -> Vec<Vec<isize>> {
        self.neighbor_offsets(ndim)
            .into_iter()
            .filter(|offset| {
                offset
                    .iter()
                    .find(|&&c| c != 0)
                    .map(|&c| c < 0)
                    .unwrap_or(false)
            })
            .collect()
    }
}

/// Applies a signed offset to a coordinate, returning None when the result
/// falls outside `shape`.
pub(crate) fn offset_coords(
    coords: &[usize],
    offset: &[isize],
    shape: &[usize],
) -> Option<Vec<usize>> {
    let mut out = Vec::with_capacity(coords.len());
    for d in 0..coords.len() {
        let c = coords[d] as isize + offset[d];
        if c < 0 || c as usize >= shape[d] {
            return None;
        }
        out.push(c as usize);
    }
    Some(out)
}
