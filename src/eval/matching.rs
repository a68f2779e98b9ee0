//! Instance matching between prediction and ground truth.
//!
//! Ground-truth instances are matched greedily, in ascending id order, to
//! the predicted instance with the highest IoU among spatial candidates.
//! Candidate pruning goes through an R-tree over predicted bounding boxes,
//! which keeps the pairing cost sub-quadratic in instance count; the exact
//! overlap then comes from the co-occurrence counts, never from re-reading
//! the volumes.

use std::collections::{BTreeMap, HashMap, HashSet};

use rstar::{RTree, RTreeObject, AABB};

use super::InstanceStats;

/// Pairing between one ground-truth instance and its best predicted
/// instance, or unmatched.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    /// Ground-truth instance id.
    pub truth_id: u64,
    /// Matched predicted instance id, or None for a false negative.
    pub pred_id: Option<u64>,
    /// IoU of the accepted pair (0 when unmatched).
    pub iou: f64,
    /// Overlapping voxel count of the accepted pair.
    pub overlap_voxels: u64,
}

struct IndexedInstance {
    id: u64,
    envelope: AABB<[f64; 3]>,
}

impl RTreeObject for IndexedInstance {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn instance_envelope(stats: &InstanceStats) -> AABB<[f64; 3]> {
    let min = stats.bbox_min.map(|c| c as f64);
    // half-open upper corner so adjacent instances register as neighbors
    let max = stats.bbox_max.map(|c| (c + 1) as f64);
    AABB::from_corners(min, max)
}

/// Greedy best-overlap assignment.
///
/// Each ground-truth instance (ascending id) takes the not-yet-matched
/// predicted candidate with the highest IoU at or above `min_iou`; ties
/// break to the lowest predicted id. Unmatched ground truth becomes a false
/// negative, unmatched predictions become false positives.
pub(crate) fn greedy_match(
    truth: &BTreeMap<u64, InstanceStats>,
    pred: &BTreeMap<u64, InstanceStats>,
    overlap: &HashMap<(u64, u64), u64>,
    min_iou: f64,
) -> Vec<MatchRecord> {
    let index = RTree::bulk_load(
        pred.iter()
            .map(|(&id, stats)| IndexedInstance {
                id,
                envelope: instance_envelope(stats),
            })
            .collect(),
    );

    let mut matched_preds: HashSet<u64> = HashSet::new();
    let mut records = Vec::with_capacity(truth.len());

    for (&truth_id, truth_stats) in truth {
        let query = instance_envelope(truth_stats);
        let mut candidates: Vec<u64> = index
            .locate_in_envelope_intersecting(&query)
            .map(|obj| obj.id)
            .filter(|id| !matched_preds.contains(id))
            .collect();
        // the R-tree yields candidates in tree order; sort so ties resolve
        // to the lowest predicted id
        candidates.sort_unstable();

        let mut best: Option<(u64, f64, u64)> = None;
        for pred_id in candidates {
            let Some(&overlap_voxels) = overlap.get(&(truth_id, pred_id)) else {
                continue;
            };
            let union = truth_stats.voxels + pred[&pred_id].voxels - overlap_voxels;
            let iou = overlap_voxels as f64 / union as f64;
            if iou < min_iou {
                continue;
            }
            // strict comparison keeps the first (lowest) id on an exact tie
            if best.map(|(_, best_iou, _)| iou > best_iou).unwrap_or(true) {
                best = Some((pred_id, iou, overlap_voxels));
            }
        }

        match best {
            Some((pred_id, iou, overlap_voxels)) => {
                matched_preds.insert(pred_id);
                records.push(MatchRecord {
                    truth_id,
                    pred_id: Some(pred_id),
                    iou,
                    overlap_voxels,
                });
            }
            None => records.push(MatchRecord {
                truth_id,
                pred_id: None,
                iou: 0.0,
                overlap_voxels: 0,
            }),
        }
    }

    records
}
