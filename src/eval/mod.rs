//! Volumetric evaluation: comparing a predicted label volume to ground
//! truth.
//!
//! The engine never materializes either volume whole. Overlap between
//! predicted and ground-truth instances is accumulated blockwise as a
//! co-occurrence count alongside per-instance statistics (voxel count,
//! centroid, bounding box); matching then runs entirely over those
//! aggregates, with an R-tree over predicted bounding boxes pruning the
//! candidate pairs.
//!
//! Scoring follows the challenge conventions: a volume is scored per class
//! label, over the intersection of predicted and ground-truth class names,
//! and the report carries per-class scores plus an overall aggregate.
//!
//! # Modules
//!
//! * `matching` - greedy best-IoU assignment over spatial candidates
//! * `metrics` - per-class and aggregate accuracy scores

pub mod matching;
pub mod metrics;

pub use matching::MatchRecord;
pub use metrics::{ClassMetrics, MetricsReport};

use std::collections::{BTreeMap, HashMap};

use ndarray::{ArrayD, Dimension};
use rayon::prelude::*;

use crate::core::{BlockwiseConfig, ParallelPolicy, SegError, SegResult};
use crate::domain::{Domain, Region};
use crate::planner::BlockPlanner;
use crate::volume::VolumeSource;
use metrics::ClassTally;

/// Per-instance spatial statistics gathered during accumulation.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceStats {
    /// Voxel count.
    pub voxels: u64,
    /// Sum of voxel coordinates, for the centroid.
    pub coord_sum: [f64; 3],
    /// Inclusive bounding-box corner closest to the origin.
    pub bbox_min: [usize; 3],
    /// Inclusive bounding-box corner farthest from the origin.
    pub bbox_max: [usize; 3],
}

impl InstanceStats {
    fn new_at(coords: [usize; 3]) -> Self {
        Self {
            voxels: 1,
            coord_sum: coords.map(|c| c as f64),
            bbox_min: coords,
            bbox_max: coords,
        }
    }

    fn record(&mut self, coords: [usize; 3]) {
        self.voxels += 1;
        for d in 0..3 {
            self.coord_sum[d] += coords[d] as f64;
            self.bbox_min[d] = self.bbox_min[d].min(coords[d]);
            self.bbox_max[d] = self.bbox_max[d].max(coords[d]);
        }
    }

    fn merge(&mut self, other: &InstanceStats) {
        self.voxels += other.voxels;
        for d in 0..3 {
            self.coord_sum[d] += other.coord_sum[d];
            self.bbox_min[d] = self.bbox_min[d].min(other.bbox_min[d]);
            self.bbox_max[d] = self.bbox_max[d].max(other.bbox_max[d]);
        }
    }

    /// Centroid in voxel coordinates.
    pub fn centroid(&self) -> [f64; 3] {
        self.coord_sum.map(|s| s / self.voxels as f64)
    }
}

/// Blockwise accumulation state: co-occurrence counts plus per-instance
/// statistics for both volumes.
#[derive(Debug, Default)]
struct Accumulator {
    overlap: HashMap<(u64, u64), u64>,
    truth: BTreeMap<u64, InstanceStats>,
    pred: BTreeMap<u64, InstanceStats>,
}

impl Accumulator {
    fn record_region(&mut self, region: &Region, pred: &ArrayD<u64>, truth: &ArrayD<u64>) {
        let offset = region.offset();
        for (ix, &truth_id) in truth.indexed_iter() {
            let local = ix.slice();
            let pred_id = pred[local];
            if truth_id == 0 && pred_id == 0 {
                continue;
            }
            let coords = [
                offset[0] + local[0],
                offset[1] + local[1],
                offset[2] + local[2],
            ];
            if truth_id != 0 {
                self.truth
                    .entry(truth_id)
                    .and_modify(|s| s.record(coords))
                    .or_insert_with(|| InstanceStats::new_at(coords));
            }
            if pred_id != 0 {
                self.pred
                    .entry(pred_id)
                    .and_modify(|s| s.record(coords))
                    .or_insert_with(|| InstanceStats::new_at(coords));
            }
            if truth_id != 0 && pred_id != 0 {
                *self.overlap.entry((truth_id, pred_id)).or_insert(0) += 1;
            }
        }
    }

    fn merge(mut self, other: Accumulator) -> Accumulator {
        for (pair, count) in other.overlap {
            *self.overlap.entry(pair).or_insert(0) += count;
        }
        for (id, stats) in other.truth {
            self.truth
                .entry(id)
                .and_modify(|s| s.merge(&stats))
                .or_insert(stats);
        }
        for (id, stats) in other.pred {
            self.pred
                .entry(id)
                .and_modify(|s| s.merge(&stats))
                .or_insert(stats);
        }
        self
    }
}

/// Compares predicted and ground-truth label volumes and produces a
/// [`MetricsReport`].
pub struct EvaluationEngine {
    min_iou: f64,
    block_shape: Vec<usize>,
    parallel: ParallelPolicy,
}

impl EvaluationEngine {
    /// Creates an engine with the given minimum matching IoU.
    pub fn new(min_iou: f64) -> Self {
        Self {
            min_iou,
            block_shape: vec![64, 64, 64],
            parallel: ParallelPolicy::default(),
        }
    }

    /// Creates an engine from the run configuration.
    pub fn from_config(config: &BlockwiseConfig) -> Self {
        Self {
            min_iou: config.min_iou,
            block_shape: config.block_shape.clone(),
            parallel: config.parallel.clone(),
        }
    }

    /// Set the accumulation block shape.
    pub fn with_block_shape(mut self, shape: Vec<usize>) -> Self {
        self.block_shape = shape;
        self
    }

    /// Set the parallel policy for blockwise accumulation.
    pub fn with_parallel(mut self, parallel: ParallelPolicy) -> Self {
        self.parallel = parallel;
        self
    }

    /// Scores one class: a predicted instance volume against its ground
    /// truth. Both volumes must be three-dimensional and share a shape.
    pub fn score_class<P, T>(
        &self,
        pred: &P,
        truth: &T,
    ) -> SegResult<(ClassMetrics, Vec<MatchRecord>)>
    where
        P: VolumeSource<u64> + ?Sized,
        T: VolumeSource<u64> + ?Sized,
    {
        let (tally, records) = self.score_class_tally(pred, truth)?;
        Ok((tally.metrics(), records))
    }

    /// Scores every class present in both maps, following the submission
    /// convention: classes missing from either side are skipped.
    pub fn score_volume(
        &self,
        pred: &BTreeMap<String, &dyn VolumeSource<u64>>,
        truth: &BTreeMap<String, &dyn VolumeSource<u64>>,
    ) -> SegResult<MetricsReport> {
        let mut classes = BTreeMap::new();
        let mut total = ClassTally::default();
        for (name, pred_volume) in pred {
            let Some(truth_volume) = truth.get(name) else {
                tracing::warn!(class = %name, "class missing from ground truth, skipping");
                continue;
            };
            let (tally, _) = self.score_class_tally(*pred_volume, *truth_volume)?;
            total.add(&tally);
            classes.insert(name.clone(), tally.metrics());
        }
        for name in truth.keys() {
            if !pred.contains_key(name) {
                tracing::warn!(class = %name, "class missing from prediction, skipping");
            }
        }
        Ok(MetricsReport {
            classes,
            overall: total.metrics(),
        })
    }

    fn score_class_tally<P, T>(
        &self,
        pred: &P,
        truth: &T,
    ) -> SegResult<(ClassTally, Vec<MatchRecord>)>
    where
        P: VolumeSource<u64> + ?Sized,
        T: VolumeSource<u64> + ?Sized,
    {
        let accumulated = self.accumulate(pred, truth)?;
        let records = matching::greedy_match(
            &accumulated.truth,
            &accumulated.pred,
            &accumulated.overlap,
            self.min_iou,
        );

        let mut tally = ClassTally {
            intersection_voxels: accumulated.overlap.values().sum(),
            pred_voxels: accumulated.pred.values().map(|s| s.voxels).sum(),
            truth_voxels: accumulated.truth.values().map(|s| s.voxels).sum(),
            ..ClassTally::default()
        };
        let mut matched = 0u64;
        for record in &records {
            match record.pred_id {
                Some(_) => {
                    matched += 1;
                    tally.true_positives += 1;
                    tally.matched_iou_sum += record.iou;
                }
                None => tally.false_negatives += 1,
            }
        }
        tally.false_positives = accumulated.pred.len() as u64 - matched;
        Ok((tally, records))
    }

    /// Blockwise co-occurrence and statistics accumulation.
    fn accumulate<P, T>(&self, pred: &P, truth: &T) -> SegResult<Accumulator>
    where
        P: VolumeSource<u64> + ?Sized,
        T: VolumeSource<u64> + ?Sized,
    {
        if !(0.0..=1.0).contains(&self.min_iou) {
            return Err(SegError::evaluation(format!(
                "min_iou must be in [0, 1], got {}",
                self.min_iou
            )));
        }
        let shape = pred.shape();
        if truth.shape() != shape {
            return Err(SegError::evaluation(format!(
                "prediction shape {:?} does not match ground truth {:?}",
                shape,
                truth.shape()
            )));
        }
        if shape.len() != 3 {
            return Err(SegError::evaluation(format!(
                "evaluation requires 3-dimensional volumes, got {} axes",
                shape.len()
            )));
        }

        let core: Vec<usize> = shape
            .iter()
            .enumerate()
            .map(|(d, &extent)| {
                self.block_shape
                    .get(d)
                    .copied()
                    .unwrap_or(64)
                    .min(extent)
                    .max(1)
            })
            .collect();
        let blocks = BlockPlanner::new(core, vec![0; 3]).plan(&Domain::new(shape.clone()))?;

        let accumulate_block = |region: &Region| -> SegResult<Accumulator> {
            let pred_block = pred.read(region)?;
            let truth_block = truth.read(region)?;
            let mut acc = Accumulator::default();
            acc.record_region(region, &pred_block, &truth_block);
            Ok(acc)
        };

        if blocks.len() > self.parallel.accumulation_threshold {
            blocks
                .par_iter()
                .map(|block| accumulate_block(block.core()))
                .try_reduce(Accumulator::default, |a, b| Ok(a.merge(b)))
        } else {
            let mut total = Accumulator::default();
            for block in &blocks {
                total = total.merge(accumulate_block(block.core())?);
            }
            Ok(total)
        }
    }
}
