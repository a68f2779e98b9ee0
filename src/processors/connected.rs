//! Connected-component labeling within one block.

use ndarray::{ArrayD, Dimension};
use serde::{Deserialize, Serialize};

use super::types::{offset_coords, Connectivity};
use crate::stitcher::UnionFind;

/// Assigns local instance ids to connected foreground regions of a mask.
///
/// Labeling covers the full block including its halo, so components touching
/// a block boundary get connectivity-correct labels; the ids themselves are
/// local to the block and meaningless until the stitcher maps them into the
/// global id space.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectedComponents {
    /// Neighborhood structure (default: faces only).
    #[serde(default)]
    pub connectivity: Connectivity,

    /// Per-axis halo override. One voxel of context is enough to make
    /// face-adjacency consistent across block seams.
    #[serde(default)]
    pub halo: Option<usize>,
}

impl ConnectedComponents {
    /// Creates a labeling operator with the given connectivity.
    pub fn new(connectivity: Connectivity) -> Self {
        Self {
            connectivity,
            halo: None,
        }
    }

    pub(crate) fn apply(&self, mask: &ArrayD<u8>) -> ArrayD<u64> {
        label_components(mask, self.connectivity).0
    }
}

/// Two-pass connected-component labeling with union-find equivalence
/// resolution.
///
/// The first pass scans in row-major order, assigning provisional labels and
/// unioning across already-visited neighbors. The second pass resolves each
/// provisional label to its set root and compacts roots to consecutive ids
/// (1-based, in first-appearance order), which makes the output independent
/// of the union order.
///
/// Returns the label array and the number of components.
pub fn label_components(mask: &ArrayD<u8>, connectivity: Connectivity) -> (ArrayD<u64>, u64) {
    let shape = mask.shape().to_vec();
    let ndim = shape.len();
    let mut labels: ArrayD<usize> = ArrayD::zeros(mask.raw_dim());
    // key 0 is background
    let mut equivalences = UnionFind::new(1);
    let backward = connectivity.backward_offsets(ndim);

    let mut neighbor_labels: Vec<usize> = Vec::with_capacity(backward.len());
    for (ix, &value) in mask.indexed_iter() {
        if value == 0 {
            continue;
        }
        let coords = ix.slice();
        neighbor_labels.clear();
        for offset in &backward {
            if let Some(ncoords) = offset_coords(coords, offset, &shape) {
                let neighbor = labels[&ncoords[..]];
                if neighbor > 0 {
                    neighbor_labels.push(neighbor);
                }
            }
        }
        let label = match neighbor_labels.iter().min() {
            None => equivalences.make_set(),
            Some(&min_label) => {
                for &neighbor in &neighbor_labels {
                    if neighbor != min_label {
                        equivalences.union(min_label, neighbor);
                    }
                }
                min_label
            }
        };
        labels[coords] = label;
    }

    // Second pass: resolve roots and compact to consecutive ids.
    let mut compact = vec![0u64; equivalences.len()];
    let mut next_id = 0u64;
    let mut out: ArrayD<u64> = ArrayD::zeros(mask.raw_dim());
    for (ix, &provisional) in labels.indexed_iter() {
        if provisional == 0 {
            continue;
        }
        let root = equivalences.find(provisional);
        if compact[root] == 0 {
            next_id += 1;
            compact[root] = next_id;
        }
        out[ix.slice()] = compact[root];
    }

    (out, next_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn mask_2d(rows: &[&[u8]]) -> ArrayD<u8> {
        let data: Vec<u8> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        ArrayD::from_shape_vec(IxDyn(&[rows.len(), rows[0].len()]), data).unwrap()
    }

    #[test]
    fn separate_regions_get_distinct_ids() {
        let mask = mask_2d(&[
            &[1, 1, 0, 0],
            &[0, 0, 0, 0],
            &[0, 0, 1, 1],
        ]);
        let (labels, count) = label_components(&mask, Connectivity::Faces);
        assert_eq!(count, 2);
        assert_eq!(labels[[0, 0]], 1);
        assert_eq!(labels[[0, 1]], 1);
        assert_eq!(labels[[2, 2]], 2);
        assert_eq!(labels[[1, 1]], 0);
    }

    #[test]
    fn u_shape_merges_into_one_component() {
        // the two arms only meet at the bottom; naive single-pass scanning
        // assigns them different provisional labels
        let mask = mask_2d(&[
            &[1, 0, 1],
            &[1, 0, 1],
            &[1, 1, 1],
        ]);
        let (labels, count) = label_components(&mask, Connectivity::Faces);
        assert_eq!(count, 1);
        assert_eq!(labels[[0, 0]], labels[[0, 2]]);
    }

    #[test]
    fn diagonal_touch_depends_on_connectivity() {
        let mask = mask_2d(&[
            &[1, 0],
            &[0, 1],
        ]);
        let (_, faces) = label_components(&mask, Connectivity::Faces);
        assert_eq!(faces, 2);
        let (_, full) = label_components(&mask, Connectivity::Full);
        assert_eq!(full, 1);
    }

    #[test]
    fn works_in_three_dimensions() {
        let mut mask = ArrayD::zeros(IxDyn(&[3, 3, 3]));
        // a column through the volume plus one disconnected voxel
        for z in 0..3 {
            mask[[z, 1, 1]] = 1u8;
        }
        mask[[0, 0, 0]] = 1;
        let (labels, count) = label_components(&mask, Connectivity::Faces);
        assert_eq!(count, 2);
        assert_eq!(labels[[0, 1, 1]], labels[[2, 1, 1]]);
        assert_ne!(labels[[0, 0, 0]], labels[[0, 1, 1]]);
    }

    #[test]
    fn ids_are_first_appearance_ordered() {
        let mask = mask_2d(&[
            &[0, 1, 0],
            &[1, 0, 1],
        ]);
        let (labels, count) = label_components(&mask, Connectivity::Faces);
        assert_eq!(count, 3);
        assert_eq!(labels[[0, 1]], 1);
        assert_eq!(labels[[1, 0]], 2);
        assert_eq!(labels[[1, 2]], 3);
    }
}
