//! Partitioning a domain into processing blocks.
//!
//! The planner tiles the domain with non-overlapping core regions and
//! attaches a halo to each, producing the dependency-free task list the
//! executor runs over. Core regions exactly tile the domain; when the block
//! shape does not evenly divide an axis, the last block on that axis is
//! smaller, never larger. Halos are clamped at the domain boundary, so edge
//! blocks see a reduced halo rather than padded data.

use itertools::Itertools;

use crate::core::{SegError, SegResult};
use crate::domain::{Block, Domain, Region};
use crate::processors::OperatorPipeline;

/// Partitions a domain into an ordered list of blocks.
#[derive(Debug, Clone)]
pub struct BlockPlanner {
    core_shape: Vec<usize>,
    halo: Vec<usize>,
}

impl BlockPlanner {
    /// Creates a planner with an explicit per-axis core shape and halo.
    pub fn new(core_shape: Vec<usize>, halo: Vec<usize>) -> Self {
        Self { core_shape, halo }
    }

    /// Creates a planner whose halo is the per-axis maximum required by the
    /// configured operator pipeline.
    pub fn for_pipeline(core_shape: Vec<usize>, pipeline: &OperatorPipeline) -> Self {
        let ndim = core_shape.len();
        let halo = vec![pipeline.required_halo(); ndim];
        Self { core_shape, halo }
    }

    /// Per-axis halo width.
    pub fn halo(&self) -> &[usize] {
        &self.halo
    }

    /// Block core shape.
    pub fn core_shape(&self) -> &[usize] {
        &self.core_shape
    }

    /// Produces the ordered block list for `domain`.
    ///
    /// Blocks are ordered row-major over the partition grid (last axis
    /// fastest); `Block::linear_index` records that rank and is stable for a
    /// given configuration, which the manifest and the reserved id ranges
    /// rely on.
    pub fn plan(&self, domain: &Domain) -> SegResult<Vec<Block>> {
        let ndim = domain.ndim();
        self.validate(domain)?;

        let counts: Vec<usize> = domain
            .shape()
            .iter()
            .zip(&self.core_shape)
            .map(|(&extent, &core)| extent.div_ceil(core))
            .collect();

        let mut blocks = Vec::with_capacity(counts.iter().product());
        for (linear_index, grid_index) in counts
            .iter()
            .map(|&c| 0..c)
            .multi_cartesian_product()
            .enumerate()
        {
            let mut core_offset = Vec::with_capacity(ndim);
            let mut core_shape = Vec::with_capacity(ndim);
            let mut bounds_offset = Vec::with_capacity(ndim);
            let mut bounds_shape = Vec::with_capacity(ndim);
            for d in 0..ndim {
                let start = grid_index[d] * self.core_shape[d];
                let end = (start + self.core_shape[d]).min(domain.shape()[d]);
                core_offset.push(start);
                core_shape.push(end - start);

                let lo = start.saturating_sub(self.halo[d]);
                let hi = (end + self.halo[d]).min(domain.shape()[d]);
                bounds_offset.push(lo);
                bounds_shape.push(hi - lo);
            }
            blocks.push(Block::new(
                grid_index,
                linear_index,
                Region::new(core_offset, core_shape),
                Region::new(bounds_offset, bounds_shape),
            ));
        }

        tracing::debug!(
            blocks = blocks.len(),
            grid = ?counts,
            halo = ?self.halo,
            "planned blockwise partition"
        );
        Ok(blocks)
    }

    fn validate(&self, domain: &Domain) -> SegResult<()> {
        let ndim = domain.ndim();
        if ndim == 0 {
            return Err(SegError::config("domain must have at least one axis"));
        }
        if self.core_shape.len() != ndim || self.halo.len() != ndim {
            return Err(SegError::config(format!(
                "core shape ({} axes) and halo ({} axes) must match the domain ({} axes)",
                self.core_shape.len(),
                self.halo.len(),
                ndim
            )));
        }
        for d in 0..ndim {
            if self.core_shape[d] == 0 {
                return Err(SegError::config(format!(
                    "block core shape has zero extent on axis {d}"
                )));
            }
            if domain.shape()[d] == 0 {
                return Err(SegError::config(format!(
                    "domain has zero extent on axis {d}"
                )));
            }
            if self.core_shape[d] > domain.shape()[d] {
                return Err(SegError::config(format!(
                    "block core extent {} exceeds domain extent {} on axis {d}",
                    self.core_shape[d],
                    domain.shape()[d]
                )));
            }
            if self.halo[d] >= domain.shape()[d] {
                return Err(SegError::config(format!(
                    "halo {} exceeds domain extent {} on axis {d}",
                    self.halo[d],
                    domain.shape()[d]
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn cores_tile_domain_exactly() {
        let domain = Domain::new(vec![8, 12]);
        let planner = BlockPlanner::new(vec![4, 4], vec![0, 0]);
        let blocks = planner.plan(&domain).unwrap();
        assert_eq!(blocks.len(), 6);

        // Every voxel covered exactly once.
        let mut coverage = ArrayD::from_elem(IxDyn(&[8, 12]), 0u32);
        for block in &blocks {
            let patch = block.core().extract(&coverage).unwrap() + 1u32;
            block.core().assign_into(&mut coverage, &patch).unwrap();
        }
        assert!(coverage.iter().all(|&c| c == 1));
    }

    #[test]
    fn uneven_axis_gets_smaller_last_block() {
        let domain = Domain::new(vec![10]);
        let planner = BlockPlanner::new(vec![4], vec![0]);
        let blocks = planner.plan(&domain).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2].core().offset(), &[8]);
        assert_eq!(blocks[2].core().shape(), &[2]);
    }

    #[test]
    fn halo_is_clamped_at_domain_boundary() {
        let domain = Domain::new(vec![8, 8]);
        let planner = BlockPlanner::new(vec![4, 4], vec![2, 2]);
        let blocks = planner.plan(&domain).unwrap();

        let first = &blocks[0];
        assert_eq!(first.bounds().offset(), &[0, 0]);
        assert_eq!(first.bounds().shape(), &[6, 6]);

        let last = blocks.last().unwrap();
        assert_eq!(last.bounds().offset(), &[2, 2]);
        assert_eq!(last.bounds().shape(), &[6, 6]);
    }

    #[test]
    fn linear_index_is_row_major() {
        let domain = Domain::new(vec![8, 8]);
        let planner = BlockPlanner::new(vec![4, 4], vec![0, 0]);
        let blocks = planner.plan(&domain).unwrap();
        assert_eq!(blocks[0].grid_index(), &[0, 0]);
        assert_eq!(blocks[1].grid_index(), &[0, 1]);
        assert_eq!(blocks[2].grid_index(), &[1, 0]);
        assert_eq!(blocks[1].linear_index(), 1);
    }

    #[test]
    fn oversized_block_is_a_configuration_error() {
        let domain = Domain::new(vec![8, 8]);
        let planner = BlockPlanner::new(vec![16, 4], vec![0, 0]);
        assert!(matches!(
            planner.plan(&domain),
            Err(SegError::Config { .. })
        ));
    }

    #[test]
    fn halo_exceeding_domain_is_a_configuration_error() {
        let domain = Domain::new(vec![8, 8]);
        let planner = BlockPlanner::new(vec![4, 4], vec![8, 0]);
        assert!(matches!(
            planner.plan(&domain),
            Err(SegError::Config { .. })
        ));
    }
}
