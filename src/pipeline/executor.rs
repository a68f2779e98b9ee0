//! The blockwise executor: runs the operator pipeline over every block.
//!
//! Each block is independent work: read core+halo from the source, run the
//! pipeline, offset the resulting local labels into the block's reserved
//! global id range, and write the core region to the sink. The halo output
//! is discarded; it exists to give operators correct context at seams.
//!
//! The core write happens once, after the full compute, so a failed block
//! never leaves partially written output. Transient storage failures are
//! retried with backoff; permanent errors fail the block immediately.
//! Failures are recorded in the manifest and do not abort sibling blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;

use super::manifest::{ManifestStore, RunManifest};
use super::stats::RunSummary;
use crate::core::{BlockwiseConfig, ParallelPolicy, RetryPolicy, SegError, SegResult};
use crate::domain::Block;
use crate::processors::OperatorPipeline;
use crate::volume::{VolumeSink, VolumeSource};

/// Schedules and runs the operator pipeline over a planned block list.
pub struct BlockwiseExecutor<'a> {
    pipeline: &'a OperatorPipeline,
    retry: RetryPolicy,
    parallel: ParallelPolicy,
    id_stride: u64,
    abort: Arc<AtomicBool>,
}

impl<'a> BlockwiseExecutor<'a> {
    /// Creates an executor from the run configuration.
    pub fn new(config: &BlockwiseConfig, pipeline: &'a OperatorPipeline) -> Self {
        Self {
            pipeline,
            retry: config.retry.clone(),
            parallel: config.parallel.clone(),
            id_stride: config.id_stride,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle that aborts the run when set. In-flight blocks finish (their
    /// writes are all-or-nothing); unstarted blocks are left for a later
    /// resume, and the manifest stays valid.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Use an externally owned abort flag instead of the internal one.
    pub fn with_abort(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    /// Runs every block not already recorded in the manifest.
    ///
    /// Returns the run summary and the updated manifest. The manifest is
    /// persisted through `store` after every block completion, so a crash
    /// loses at most the in-flight blocks.
    pub fn run<S, K, M>(
        &self,
        blocks: &[Block],
        source: &S,
        sink: &K,
        manifest: RunManifest,
        store: &M,
    ) -> SegResult<(RunSummary, RunManifest)>
    where
        S: VolumeSource<f32> + ?Sized,
        K: VolumeSink<u64> + ?Sized,
        M: ManifestStore + ?Sized,
    {
        let manifest = Mutex::new(manifest);
        let summary = Mutex::new(RunSummary::new(blocks.len()));
        let fatal: Mutex<Option<SegError>> = Mutex::new(None);

        let process = |block: &Block| {
            if self.abort.load(Ordering::Relaxed) {
                return;
            }
            if manifest.lock().unwrap().is_completed(block.linear_index()) {
                summary.lock().unwrap().skipped += 1;
                return;
            }
            match self.process_block(block, source, sink) {
                Ok(retries) => {
                    let guard = {
                        let mut m = manifest.lock().unwrap();
                        m.record_completed(block.linear_index());
                        store.save(&m)
                    };
                    if let Err(err) = guard {
                        // without a durable completion record, resume
                        // guarantees are gone; stop the run
                        tracing::error!(
                            block = block.linear_index(),
                            error = %err,
                            "failed to persist manifest"
                        );
                        let mut slot = fatal.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(err);
                        }
                        self.abort.store(true, Ordering::Relaxed);
                        return;
                    }
                    let mut s = summary.lock().unwrap();
                    s.succeeded += 1;
                    s.retries += retries;
                }
                Err(err) => {
                    tracing::warn!(
                        block = block.linear_index(),
                        error = %err,
                        "block failed"
                    );
                    {
                        let mut m = manifest.lock().unwrap();
                        m.record_failed(block.linear_index(), err.to_string());
                        if let Err(save_err) = store.save(&m) {
                            tracing::warn!(error = %save_err, "could not persist failure record");
                        }
                    }
                    summary.lock().unwrap().failed += 1;
                }
            }
        };

        let pool = self
            .parallel
            .build_pool()
            .map_err(|e| SegError::config(format!("worker pool: {e}")))?;
        let execute = || {
            if self.parallel.should_parallelize_blocks(blocks.len()) {
                blocks.par_iter().for_each(&process);
            } else {
                blocks.iter().for_each(&process);
            }
        };
        match pool {
            Some(pool) => pool.install(execute),
            None => execute(),
        }

        if let Some(err) = fatal.into_inner().unwrap() {
            return Err(err);
        }
        let mut summary = summary.into_inner().unwrap();
        summary.aborted = self.abort.load(Ordering::Relaxed) && summary.unprocessed() > 0;
        let manifest = manifest.into_inner().unwrap();

        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            retries = summary.retries,
            "blockwise phase finished"
        );
        Ok((summary, manifest))
    }

    /// Processes one block under the retry policy. Returns the number of
    /// retries used on success.
    fn process_block<S, K>(&self, block: &Block, source: &S, sink: &K) -> SegResult<usize>
    where
        S: VolumeSource<f32> + ?Sized,
        K: VolumeSink<u64> + ?Sized,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt_block(block, source, sink) {
                Ok(()) => {
                    if attempts > 1 {
                        tracing::debug!(
                            block = block.linear_index(),
                            attempts,
                            "block succeeded after retry"
                        );
                    }
                    return Ok(attempts - 1);
                }
                Err(err) if err.is_transient() && attempts <= self.retry.max_retries => {
                    let delay = self.retry.backoff.delay_for(attempts - 1);
                    tracing::warn!(
                        block = block.linear_index(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => {
                    return Err(SegError::BlockFailed {
                        block: block.linear_index(),
                        attempts,
                        source: Box::new(err),
                    });
                }
            }
        }
    }

    /// One attempt: read, compute, write the core.
    fn attempt_block<S, K>(&self, block: &Block, source: &S, sink: &K) -> SegResult<()>
    where
        S: VolumeSource<f32> + ?Sized,
        K: VolumeSink<u64> + ?Sized,
    {
        let bounds = block.bounds();
        let intensity = source.read(bounds)?;
        if intensity.shape() != bounds.shape() {
            return Err(SegError::invalid_input(format!(
                "source returned shape {:?} for region {bounds}",
                intensity.shape()
            )));
        }

        let labels = self.pipeline.apply(intensity)?;
        if labels.shape() != bounds.shape() {
            return Err(SegError::invalid_input(format!(
                "pipeline changed block shape: {:?} vs {:?}",
                labels.shape(),
                bounds.shape()
            )));
        }

        let max_local = labels.iter().copied().max().unwrap_or(0);
        if max_local >= self.id_stride {
            return Err(SegError::invalid_input(format!(
                "block {} produced local label {max_local}, which does not fit \
                 the reserved id range (stride {})",
                block.linear_index(),
                self.id_stride
            )));
        }

        let base = block.id_base(self.id_stride);
        let global = labels.mapv(|l| if l == 0 { 0 } else { base + l });
        let core = block.core_in_bounds().extract(&global)?;
        sink.write(block.core(), &core)
    }
}
