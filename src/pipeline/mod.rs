//! The two-phase segmentation pipeline.
//!
//! Phase one is embarrassingly parallel: the executor runs the operator
//! pipeline over every block and writes block-local labels, offset into
//! disjoint reserved id ranges, to the output volume. The completion of
//! that phase is a barrier; the stitcher's sequential union-find merge runs
//! behind it, followed by the second parallel phase that rewrites every
//! core through the global relabel map and applies size filtering.
//!
//! # Modules
//!
//! * `executor` - worker pool, retries, all-or-nothing block writes
//! * `manifest` - persisted per-block completion records for resume
//! * `stats` - run summary reporting

pub mod executor;
pub mod manifest;
pub mod stats;

pub use executor::BlockwiseExecutor;
pub use manifest::{FileManifestStore, ManifestStore, MemoryManifestStore, RunManifest};
pub use stats::RunSummary;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::core::{BlockwiseConfig, ConfigValidator, RunFingerprint, SegResult};
use crate::domain::Domain;
use crate::planner::BlockPlanner;
use crate::processors::OperatorPipeline;
use crate::stitcher::Stitcher;
use crate::volume::{VolumeSink, VolumeSource};

/// End-to-end blockwise post-processing: plan, execute, stitch.
pub struct SegmentationPipeline {
    config: BlockwiseConfig,
    operators: OperatorPipeline,
}

impl SegmentationPipeline {
    /// Creates a pipeline, validating the configuration and the operator
    /// chain before any work can start.
    pub fn new(config: BlockwiseConfig, operators: OperatorPipeline) -> SegResult<Self> {
        config.validate()?;
        operators.validate()?;
        Ok(Self { config, operators })
    }

    /// The deterministic identifier of a run of this pipeline over `domain`.
    pub fn fingerprint(&self, domain: &Domain) -> SegResult<RunFingerprint> {
        let halo = vec![self.operators.required_halo(); domain.ndim()];
        RunFingerprint::compute(domain, &self.config.block_shape, &halo, &self.operators)
    }

    /// Runs the full pipeline over `domain`, reading intensity from
    /// `source` and producing a stitched label volume in `output`.
    ///
    /// A manifest recorded under the run's fingerprint is resumed: blocks it
    /// lists as completed are skipped. If any block ultimately fails, the
    /// stitch phase is skipped (it requires global completeness) and the
    /// returned summary reports the failures; a later re-run resumes from
    /// the manifest.
    pub fn run<S, O, M>(
        &self,
        domain: &Domain,
        source: &S,
        output: &O,
        store: &M,
    ) -> SegResult<RunSummary>
    where
        S: VolumeSource<f32> + ?Sized,
        O: VolumeSource<u64> + VolumeSink<u64> + ?Sized,
        M: ManifestStore + ?Sized,
    {
        self.run_with_abort(domain, source, output, store, None)
    }

    /// As [`run`](Self::run), with an external abort flag. When the flag is
    /// set mid-run, in-flight blocks finish, the manifest stays valid, and
    /// the summary reports the abort.
    pub fn run_with_abort<S, O, M>(
        &self,
        domain: &Domain,
        source: &S,
        output: &O,
        store: &M,
        abort: Option<Arc<AtomicBool>>,
    ) -> SegResult<RunSummary>
    where
        S: VolumeSource<f32> + ?Sized,
        O: VolumeSource<u64> + VolumeSink<u64> + ?Sized,
        M: ManifestStore + ?Sized,
    {
        let planner =
            BlockPlanner::for_pipeline(self.config.block_shape.clone(), &self.operators);
        let blocks = planner.plan(domain)?;
        let fingerprint = self.fingerprint(domain)?;

        let manifest = match store.load(&fingerprint)? {
            Some(manifest) if manifest.matches(&fingerprint) => {
                tracing::info!(
                    completed = manifest.completed_count(),
                    %fingerprint,
                    "resuming from manifest"
                );
                manifest
            }
            Some(_) => {
                tracing::warn!(
                    %fingerprint,
                    "manifest fingerprint mismatch, starting from scratch"
                );
                RunManifest::new(fingerprint.clone())
            }
            None => RunManifest::new(fingerprint.clone()),
        };

        let mut executor = BlockwiseExecutor::new(&self.config, &self.operators);
        if let Some(flag) = abort {
            executor = executor.with_abort(flag);
        }
        let (mut summary, _manifest) = executor.run(&blocks, source, output, manifest, store)?;

        if !summary.is_complete() {
            tracing::warn!(
                failed = summary.failed,
                unprocessed = summary.unprocessed(),
                "skipping stitch: the run is incomplete"
            );
            return Ok(summary);
        }

        // barrier reached: every core is written, stitching may run
        let min_size = self
            .operators
            .size_filter_threshold()
            .unwrap_or(self.config.min_component_size);
        let report = Stitcher::new(&blocks, self.config.id_stride)
            .with_min_component_size(min_size)
            .with_connectivity(self.operators.connectivity())
            .with_parallel(self.config.parallel.clone())
            .stitch(output)?;
        summary.stitch = Some(report);
        Ok(summary)
    }
}
