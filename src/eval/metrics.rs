//! Aggregate accuracy metrics.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::SegResult;

/// Raw per-class tallies accumulated during matching. Converted into
/// [`ClassMetrics`] once matching is complete; summable across classes for
/// the overall row.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ClassTally {
    pub true_positives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub matched_iou_sum: f64,
    /// Voxels where both volumes are foreground, regardless of instance ids.
    pub intersection_voxels: u64,
    pub pred_voxels: u64,
    pub truth_voxels: u64,
}

impl ClassTally {
    pub fn add(&mut self, other: &ClassTally) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
        self.matched_iou_sum += other.matched_iou_sum;
        self.intersection_voxels += other.intersection_voxels;
        self.pred_voxels += other.pred_voxels;
        self.truth_voxels += other.truth_voxels;
    }

    pub fn metrics(&self) -> ClassMetrics {
        let tp = self.true_positives as f64;
        let precision = ratio(tp, tp + self.false_positives as f64);
        let recall = ratio(tp, tp + self.false_negatives as f64);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        ClassMetrics {
            true_positives: self.true_positives,
            false_positives: self.false_positives,
            false_negatives: self.false_negatives,
            precision,
            recall,
            f1,
            mean_matched_iou: ratio(self.matched_iou_sum, tp),
            foreground_dice: ratio(
                2.0 * self.intersection_voxels as f64,
                (self.pred_voxels + self.truth_voxels) as f64,
            ),
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Instance-level accuracy scores for one semantic class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    /// Matched ground-truth/prediction pairs.
    pub true_positives: u64,
    /// Predicted instances with no matched ground truth.
    pub false_positives: u64,
    /// Ground-truth instances with no accepted match.
    pub false_negatives: u64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Mean IoU over matched pairs.
    pub mean_matched_iou: f64,
    /// Voxel-level Dice coefficient of the foreground masks.
    pub foreground_dice: f64,
}

/// The sole externally visible evaluation output: scores per semantic class
/// plus an overall aggregate, immutable once computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Per-class scores, keyed by class label name.
    pub classes: BTreeMap<String, ClassMetrics>,
    /// Aggregate over every scored class.
    pub overall: ClassMetrics,
}

impl MetricsReport {
    /// Serializes the report as pretty-printed JSON.
    pub fn to_json(&self) -> SegResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the report to a JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> SegResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
