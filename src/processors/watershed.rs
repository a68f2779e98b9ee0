//! Seeded watershed over an intensity landscape.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ndarray::{ArrayD, Dimension};
use serde::{Deserialize, Serialize};

use super::connected::label_components;
use super::types::{offset_coords, Connectivity};
use crate::core::config::ConfigError;

/// Floods instance labels outward from high-confidence marker cores.
///
/// Markers are the connected components of `intensity >= marker_cutoff`.
/// The flood then grows each marker downhill in order of decreasing
/// intensity; voxels below `foreground_cutoff` stay background. Touching
/// instances are split along the ridge between their marker cores, which
/// plain thresholding plus connected components cannot do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeededWatershed {
    /// Cutoff defining marker cores. Must be at least `foreground_cutoff`.
    pub marker_cutoff: f32,

    /// Cutoff below which voxels are never claimed by any instance.
    pub foreground_cutoff: f32,

    /// Neighborhood structure for both marker labeling and flooding.
    #[serde(default)]
    pub connectivity: Connectivity,

    /// Per-axis halo override. The flood needs more context than plain
    /// labeling; the default is 2.
    #[serde(default)]
    pub halo: Option<usize>,
}

/// Queue entry: voxels pop in order of decreasing intensity, ties broken by
/// insertion order so the flood is deterministic.
struct FloodItem {
    priority: f32,
    seq: u64,
    coords: Vec<usize>,
}

impl PartialEq for FloodItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FloodItem {}

impl PartialOrd for FloodItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloodItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl SeededWatershed {
    /// Creates a watershed operator with the given cutoffs.
    pub fn new(marker_cutoff: f32, foreground_cutoff: f32) -> Self {
        Self {
            marker_cutoff,
            foreground_cutoff,
            connectivity: Connectivity::default(),
            halo: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.marker_cutoff.is_nan() || self.foreground_cutoff.is_nan() {
            return Err(ConfigError::InvalidConfig {
                message: "watershed cutoffs must not be NaN".to_string(),
            });
        }
        if self.marker_cutoff < self.foreground_cutoff {
            return Err(ConfigError::InvalidConfig {
                message: format!(
                    "marker cutoff {} must be at least the foreground cutoff {}",
                    self.marker_cutoff, self.foreground_cutoff
                ),
            });
        }
        Ok(())
    }

    pub(crate) fn apply(&self, intensity: &ArrayD<f32>) -> ArrayD<u64> {
        let shape = intensity.shape().to_vec();
        let ndim = shape.len();

        let marker_mask = intensity.mapv(|v| u8::from(v >= self.marker_cutoff));
        let (mut labels, marker_count) = label_components(&marker_mask, self.connectivity);
        if marker_count == 0 {
            return labels;
        }

        let offsets = self.connectivity.neighbor_offsets(ndim);
        let mut heap: BinaryHeap<FloodItem> = BinaryHeap::new();
        let mut seq = 0u64;
        for (ix, &label) in labels.indexed_iter() {
            if label > 0 {
                heap.push(FloodItem {
                    priority: intensity[ix.slice()],
                    seq,
                    coords: ix.slice().to_vec(),
                });
                seq += 1;
            }
        }

        while let Some(item) = heap.pop() {
            let label = labels[&item.coords[..]];
            for offset in &offsets {
                let Some(ncoords) = offset_coords(&item.coords, offset, &shape) else {
                    continue;
                };
                if labels[&ncoords[..]] > 0 {
                    continue;
                }
                let value = intensity[&ncoords[..]];
                if value < self.foreground_cutoff {
                    continue;
                }
                labels[&ncoords[..]] = label;
                heap.push(FloodItem {
                    priority: value,
                    seq,
                    coords: ncoords,
                });
                seq += 1;
            }
        }

        labels
    }
}
