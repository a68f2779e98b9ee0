//! Cross-block stitching: turning block-local instance ids into a globally
//! consistent labeling.
//!
//! Each block writes its labels offset into a disjoint reserved id range, so
//! no merging is needed for ids to be unique. The stitcher then compares the
//! one-voxel strips on either side of every shared core boundary: label
//! pairs that touch across the face are unioned, each union-find set is
//! assigned its lowest member id, and a final parallel pass rewrites every
//! block's core through the resulting relabel map. Global size filtering
//! runs after that pass, over true component sizes: a component spanning
//! two blocks is never judged by its per-block fragments.
//!
//! The merge step is the one sequential point of the pipeline: all unions
//! are performed by the calling thread against a single union-find, between
//! the parallel compute phase and the parallel relabel phase.

pub mod union_find;

pub use union_find::UnionFind;

use std::collections::HashMap;

use ndarray::Dimension;
use rayon::prelude::*;

use crate::core::{ParallelPolicy, SegError, SegResult};
use crate::domain::{Block, Region};
use crate::processors::Connectivity;
use crate::volume::{VolumeSink, VolumeSource};

/// Mapping from provisional global ids to final global ids.
///
/// A provisional id encodes `(block, local id)` as
/// `block_linear_index * id_stride + local_id`; the map resolves every id
/// that participates in a cross-block merge to the lowest id of its set.
/// Ids absent from the map are already final.
#[derive(Debug, Clone, Default)]
pub struct RelabelMap {
    map: HashMap<u64, u64>,
}

impl RelabelMap {
    /// Final id for a provisional id.
    pub fn resolve(&self, id: u64) -> u64 {
        *self.map.get(&id).unwrap_or(&id)
    }

    /// Number of non-identity entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no id is remapped.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn insert(&mut self, from: u64, to: u64) {
        if from != to {
            self.map.insert(from, to);
        }
    }
}

/// Union-find over sparse u64 ids, mapping them to dense keys.
struct IdMerger {
    equivalences: UnionFind,
    keys: HashMap<u64, usize>,
    ids: Vec<u64>,
    merges: usize,
}

impl IdMerger {
    fn new() -> Self {
        Self {
            equivalences: UnionFind::new(0),
            keys: HashMap::new(),
            ids: Vec::new(),
            merges: 0,
        }
    }

    fn key_of(&mut self, id: u64) -> usize {
        match self.keys.get(&id) {
            Some(&key) => key,
            None => {
                let key = self.equivalences.make_set();
                self.keys.insert(id, key);
                self.ids.push(id);
                key
            }
        }
    }

    fn union(&mut self, a: u64, b: u64) {
        let key_a = self.key_of(a);
        let key_b = self.key_of(b);
        if self.equivalences.find(key_a) != self.equivalences.find(key_b) {
            self.merges += 1;
        }
        self.equivalences.union(key_a, key_b);
    }

    /// Assigns each set its lowest member id and returns the relabel map.
    fn into_relabel_map(mut self) -> (RelabelMap, usize) {
        let mut set_min: HashMap<usize, u64> = HashMap::new();
        for key in 0..self.ids.len() {
            let root = self.equivalences.find(key);
            let id = self.ids[key];
            set_min
                .entry(root)
                .and_modify(|min| *min = (*min).min(id))
                .or_insert(id);
        }
        let mut map = RelabelMap::default();
        for key in 0..self.ids.len() {
            let root = self.equivalences.find(key);
            map.insert(self.ids[key], set_min[&root]);
        }
        (map, self.merges)
    }
}

/// Outcome of one stitching pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StitchReport {
    /// Number of distinct label sets merged across block boundaries.
    pub boundary_merges: usize,
    /// Final number of global components, after size filtering.
    pub components: u64,
    /// Components removed by the global size filter.
    pub removed_components: usize,
    /// Voxels zeroed by the global size filter.
    pub removed_voxels: u64,
}

/// Reconciles per-block label output into one consistent global labeling.
pub struct Stitcher<'a> {
    blocks: &'a [Block],
    id_stride: u64,
    min_component_size: u64,
    connectivity: Connectivity,
    parallel: ParallelPolicy,
}

impl<'a> Stitcher<'a> {
    /// Creates a stitcher over the planned blocks. `id_stride` must match
    /// the stride the executor used when offsetting local labels.
    pub fn new(blocks: &'a [Block], id_stride: u64) -> Self {
        Self {
            blocks,
            id_stride,
            min_component_size: 0,
            connectivity: Connectivity::default(),
            parallel: ParallelPolicy::default(),
        }
    }

    /// Set the global minimum component size. Zero disables filtering.
    pub fn with_min_component_size(mut self, min_voxels: u64) -> Self {
        self.min_component_size = min_voxels;
        self
    }

    /// Set the connectivity used for cross-boundary adjacency.
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Set the parallel policy for the relabel and counting passes.
    pub fn with_parallel(mut self, parallel: ParallelPolicy) -> Self {
        self.parallel = parallel;
        self
    }

    /// Runs the full stitch: boundary comparison, merge, relabel, size
    /// filter. Idempotent: re-running over already-stitched output makes
    /// no further writes.
    pub fn stitch<V>(&self, volume: &V) -> SegResult<StitchReport>
    where
        V: VolumeSource<u64> + VolumeSink<u64> + ?Sized,
    {
        if self.blocks.is_empty() {
            return Ok(StitchReport {
                boundary_merges: 0,
                components: 0,
                removed_components: 0,
                removed_voxels: 0,
            });
        }

        // Sequential merge phase: one thread owns the union-find.
        let mut merger = IdMerger::new();
        for (a, b, axis) in self.adjacent_pairs() {
            self.compare_boundary(volume, a, b, axis, &mut merger)?;
        }
        let (relabel, boundary_merges) = merger.into_relabel_map();
        tracing::debug!(
            merges = boundary_merges,
            remapped = relabel.len(),
            "cross-block merge complete"
        );

        // Nothing merged and no filter configured: the labeling is already
        // final and no write is needed.
        if relabel.is_empty() && self.min_component_size == 0 {
            let sizes = self.component_sizes(volume, &relabel)?;
            return Ok(StitchReport {
                boundary_merges,
                components: sizes.len() as u64,
                removed_components: 0,
                removed_voxels: 0,
            });
        }

        let sizes = self.component_sizes(volume, &relabel)?;
        let removed: HashMap<u64, u64> = sizes
            .iter()
            .filter(|&(_, &count)| count < self.min_component_size)
            .map(|(&id, &count)| (id, count))
            .collect();
        let removed_voxels = removed.values().sum();

        self.relabel_cores(volume, &relabel, &removed)?;

        let report = StitchReport {
            boundary_merges,
            components: (sizes.len() - removed.len()) as u64,
            removed_components: removed.len(),
            removed_voxels,
        };
        tracing::info!(
            components = report.components,
            merges = report.boundary_merges,
            removed = report.removed_components,
            "stitching finished"
        );
        Ok(report)
    }

    /// Pairs of blocks whose cores share a face, with the axis they meet on.
    fn adjacent_pairs(&self) -> Vec<(&Block, &Block, usize)> {
        let grid: HashMap<&[usize], &Block> = self
            .blocks
            .iter()
            .map(|b| (b.grid_index(), b))
            .collect();
        let mut pairs = Vec::new();
        for block in self.blocks {
            for d in 0..block.grid_index().len() {
                let mut neighbor_index = block.grid_index().to_vec();
                neighbor_index[d] += 1;
                if let Some(&neighbor) = grid.get(neighbor_index.as_slice()) {
                    pairs.push((block, neighbor, d));
                }
            }
        }
        pairs
    }

    /// Compares the one-voxel strips on either side of the shared core face
    /// of `a` and `b` and unions label pairs that touch.
    fn compare_boundary<V>(
        &self,
        volume: &V,
        a: &Block,
        b: &Block,
        axis: usize,
        merger: &mut IdMerger,
    ) -> SegResult<()>
    where
        V: VolumeSource<u64> + ?Sized,
    {
        let face = a.core().end()[axis];
        debug_assert_eq!(face, b.core().offset()[axis], "cores must abut");

        let mut a_offset = a.core().offset().to_vec();
        let mut a_shape = a.core().shape().to_vec();
        a_offset[axis] = face - 1;
        a_shape[axis] = 1;
        let strip_a = volume
            .read(&Region::new(a_offset, a_shape))
            .map_err(|e| missing_output(a, e))?;

        let mut b_offset = b.core().offset().to_vec();
        let mut b_shape = b.core().shape().to_vec();
        b_offset[axis] = face;
        b_shape[axis] = 1;
        let strip_b = volume
            .read(&Region::new(b_offset, b_shape))
            .map_err(|e| missing_output(b, e))?;

        self.check_strip_labels(a, &strip_a)?;
        self.check_strip_labels(b, &strip_b)?;

        // Offsets that cross the face: the aligned neighbor for faces-only
        // connectivity, plus the lateral diagonals for full connectivity.
        let ndim = strip_a.ndim();
        let cross: Vec<Vec<isize>> = self
            .connectivity
            .neighbor_offsets(ndim)
            .into_iter()
            .filter(|offset| offset[axis] == 1)
            .collect();
        let b_shape = strip_b.shape().to_vec();

        for (ix, &label_a) in strip_a.indexed_iter() {
            if label_a == 0 {
                continue;
            }
            let coords = ix.slice();
            for offset in &cross {
                let mut n = Vec::with_capacity(ndim);
                let mut in_bounds = true;
                for d in 0..ndim {
                    if d == axis {
                        // both strips are one voxel thick; crossing the face
                        // is the axis step itself
                        n.push(0);
                        continue;
                    }
                    let c = coords[d] as isize + offset[d];
                    if c < 0 || c as usize >= b_shape[d] {
                        in_bounds = false;
                        break;
                    }
                    n.push(c as usize);
                }
                if !in_bounds {
                    continue;
                }
                let label_b = strip_b[&n[..]];
                if label_b != 0 {
                    merger.union(label_a, label_b);
                }
            }
        }
        Ok(())
    }

    /// Every non-zero label must fall inside some block's reserved range.
    fn check_strip_labels(&self, block: &Block, strip: &ndarray::ArrayD<u64>) -> SegResult<()> {
        let block_count = self.blocks.len() as u64;
        for &label in strip.iter() {
            if label == 0 {
                continue;
            }
            let owner = label / self.id_stride;
            if owner >= block_count || label % self.id_stride == 0 {
                return Err(SegError::stitch_inconsistency(format!(
                    "label {label} near block {} is outside every reserved id range \
                     (stride {}, {} blocks)",
                    block.linear_index(),
                    self.id_stride,
                    block_count
                )));
            }
        }
        Ok(())
    }

    /// Counts voxels per final id over all block cores.
    fn component_sizes<V>(&self, volume: &V, relabel: &RelabelMap) -> SegResult<HashMap<u64, u64>>
    where
        V: VolumeSource<u64> + ?Sized,
    {
        let count_block = |block: &Block| -> SegResult<HashMap<u64, u64>> {
            let core = volume
                .read(block.core())
                .map_err(|e| missing_output(block, e))?;
            let mut counts = HashMap::new();
            for &label in core.iter() {
                if label != 0 {
                    *counts.entry(relabel.resolve(label)).or_insert(0u64) += 1;
                }
            }
            Ok(counts)
        };
        let merge = |mut into: HashMap<u64, u64>, from: HashMap<u64, u64>| {
            for (id, count) in from {
                *into.entry(id).or_insert(0) += count;
            }
            into
        };

        if self.parallel.should_parallelize_blocks(self.blocks.len()) {
            self.blocks
                .par_iter()
                .map(count_block)
                .try_reduce(HashMap::new, |a, b| Ok(merge(a, b)))
        } else {
            let mut total = HashMap::new();
            for block in self.blocks {
                total = merge(total, count_block(block)?);
            }
            Ok(total)
        }
    }

    /// Rewrites every core through the relabel map, zeroing filtered
    /// components. Blocks whose labels are unchanged are not rewritten.
    fn relabel_cores<V>(
        &self,
        volume: &V,
        relabel: &RelabelMap,
        removed: &HashMap<u64, u64>,
    ) -> SegResult<()>
    where
        V: VolumeSource<u64> + VolumeSink<u64> + ?Sized,
    {
        let relabel_block = |block: &Block| -> SegResult<()> {
            let core = volume
                .read(block.core())
                .map_err(|e| missing_output(block, e))?;
            let mut changed = false;
            let mapped = core.mapv(|label| {
                if label == 0 {
                    return 0;
                }
                let resolved = relabel.resolve(label);
                let final_label = if removed.contains_key(&resolved) {
                    0
                } else {
                    resolved
                };
                if final_label != label {
                    changed = true;
                }
                final_label
            });
            if changed {
                volume.write(block.core(), &mapped)?;
            }
            Ok(())
        };

        if self.parallel.should_parallelize_blocks(self.blocks.len()) {
            self.blocks.par_iter().try_for_each(relabel_block)
        } else {
            self.blocks.iter().try_for_each(relabel_block)
        }
    }
}

fn missing_output(block: &Block, source: SegError) -> SegError {
    SegError::stitch_inconsistency(format!(
        "block {} output could not be read: {source}",
        block.linear_index()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use crate::planner::BlockPlanner;
    use crate::volume::MemoryVolume;
    use ndarray::{ArrayD, IxDyn};

    const STRIDE: u64 = 1 << 24;

    /// Writes per-block labels as the executor would: local ids offset into
    /// the block's reserved range.
    fn write_labels(volume: &MemoryVolume<u64>, blocks: &[Block], labels: &ArrayD<u64>) {
        for block in blocks {
            let local = block.core().extract(labels).unwrap();
            let offset = local.mapv(|l| if l == 0 { 0 } else { block.id_base(STRIDE) + l });
            volume.write(block.core(), &offset).unwrap();
        }
    }

    fn plan(shape: &[usize], core: &[usize]) -> Vec<Block> {
        BlockPlanner::new(core.to_vec(), vec![1; shape.len()])
            .plan(&Domain::new(shape.to_vec()))
            .unwrap()
    }

    #[test]
    fn component_spanning_blocks_gets_one_id() {
        // a horizontal bar crossing the boundary between two 4-wide blocks
        let mut labels = ArrayD::zeros(IxDyn(&[4, 8]));
        for x in 2..6 {
            labels[[1, x]] = 1u64;
        }
        let blocks = plan(&[4, 8], &[4, 4]);
        let volume = MemoryVolume::filled(vec![4, 8], 0u64);
        write_labels(&volume, &blocks, &labels);

        let report = Stitcher::new(&blocks, STRIDE).stitch(&volume).unwrap();
        assert_eq!(report.boundary_merges, 1);
        assert_eq!(report.components, 1);

        let out = volume.snapshot();
        let left = out[[1, 2]];
        assert_ne!(left, 0);
        for x in 2..6 {
            assert_eq!(out[[1, x]], left, "bar must share one id");
        }
        // lowest participating id wins: the left block owns it
        assert_eq!(left, blocks[0].id_base(STRIDE) + 1);
    }

    #[test]
    fn disjoint_components_keep_distinct_ids() {
        let mut labels = ArrayD::zeros(IxDyn(&[4, 8]));
        labels[[0, 0]] = 1u64;
        labels[[3, 7]] = 1u64;
        let blocks = plan(&[4, 8], &[4, 4]);
        let volume = MemoryVolume::filled(vec![4, 8], 0u64);
        write_labels(&volume, &blocks, &labels);

        let report = Stitcher::new(&blocks, STRIDE).stitch(&volume).unwrap();
        assert_eq!(report.boundary_merges, 0);
        assert_eq!(report.components, 2);

        let out = volume.snapshot();
        assert_ne!(out[[0, 0]], out[[3, 7]]);
    }

    #[test]
    fn size_filter_uses_global_sizes() {
        // 3 voxels split 2/1 across the boundary; each fragment alone is
        // tiny, together they are still below the threshold of 10
        let mut labels = ArrayD::zeros(IxDyn(&[4, 8]));
        labels[[1, 2]] = 1u64;
        labels[[1, 3]] = 1;
        labels[[1, 4]] = 1;
        // a large component that must survive
        for x in 0..8 {
            for y in 0..2 {
                labels[[y + 2, x]] = 2;
            }
        }
        let blocks = plan(&[4, 8], &[4, 4]);
        let volume = MemoryVolume::filled(vec![4, 8], 0u64);
        write_labels(&volume, &blocks, &labels);

        let report = Stitcher::new(&blocks, STRIDE)
            .with_min_component_size(10)
            .stitch(&volume)
            .unwrap();
        assert_eq!(report.removed_components, 1);
        assert_eq!(report.removed_voxels, 3);
        assert_eq!(report.components, 1);

        let out = volume.snapshot();
        assert_eq!(out[[1, 2]], 0);
        assert_eq!(out[[1, 4]], 0);
        assert_ne!(out[[2, 0]], 0);
    }

    #[test]
    fn survivor_spanning_blocks_is_kept() {
        // 12 voxels split 8/4: individually below a threshold of 10 on one
        // side, together above it
        let mut labels = ArrayD::zeros(IxDyn(&[4, 8]));
        for x in 0..6 {
            labels[[1, x]] = 1u64;
            labels[[2, x]] = 1;
        }
        let blocks = plan(&[4, 8], &[4, 4]);
        let volume = MemoryVolume::filled(vec![4, 8], 0u64);
        write_labels(&volume, &blocks, &labels);

        let report = Stitcher::new(&blocks, STRIDE)
            .with_min_component_size(10)
            .stitch(&volume)
            .unwrap();
        assert_eq!(report.removed_components, 0);
        let out = volume.snapshot();
        assert_ne!(out[[1, 5]], 0);
        assert_eq!(out[[1, 5]], out[[1, 0]]);
    }

    #[test]
    fn stitch_is_idempotent() {
        let mut labels = ArrayD::zeros(IxDyn(&[4, 8]));
        for x in 2..6 {
            labels[[1, x]] = 1u64;
        }
        let blocks = plan(&[4, 8], &[4, 4]);
        let volume = MemoryVolume::filled(vec![4, 8], 0u64);
        write_labels(&volume, &blocks, &labels);

        Stitcher::new(&blocks, STRIDE).stitch(&volume).unwrap();
        let first = volume.snapshot();
        Stitcher::new(&blocks, STRIDE).stitch(&volume).unwrap();
        assert_eq!(volume.snapshot(), first);
    }

    #[test]
    fn out_of_range_label_is_an_inconsistency() {
        let blocks = plan(&[4, 8], &[4, 4]);
        let volume = MemoryVolume::filled(vec![4, 8], 0u64);
        // a label no block's reserved range can contain
        let bogus = ArrayD::from_elem(IxDyn(&[1, 1]), STRIDE * 100);
        volume
            .write(&Region::new(vec![1, 3], vec![1, 1]), &bogus)
            .unwrap();

        let result = Stitcher::new(&blocks, STRIDE).stitch(&volume);
        assert!(matches!(
            result,
            Err(SegError::StitchInconsistency { .. })
        ));
    }

    #[test]
    fn diagonal_merge_requires_full_connectivity() {
        // foreground voxels touching only diagonally across the boundary
        let mut labels = ArrayD::zeros(IxDyn(&[4, 8]));
        labels[[1, 3]] = 1u64;
        labels[[2, 4]] = 1;
        let blocks = plan(&[4, 8], &[4, 4]);

        let volume = MemoryVolume::filled(vec![4, 8], 0u64);
        write_labels(&volume, &blocks, &labels);
        let faces = Stitcher::new(&blocks, STRIDE).stitch(&volume).unwrap();
        assert_eq!(faces.boundary_merges, 0);

        let volume = MemoryVolume::filled(vec![4, 8], 0u64);
        write_labels(&volume, &blocks, &labels);
        let full = Stitcher::new(&blocks, STRIDE)
            .with_connectivity(Connectivity::Full)
            .stitch(&volume)
            .unwrap();
        assert_eq!(full.boundary_merges, 1);
    }
}
