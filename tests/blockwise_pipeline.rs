//! End-to-end tests of the blockwise pipeline: plan, execute, stitch,
//! evaluate.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use ndarray::{ArrayD, IxDyn};

use volseg::prelude::*;

/// A source that permanently fails reads overlapping the given voxel until
/// `healed` is set. Used to interrupt a run partway through.
struct FailingSource {
    inner: MemoryVolume<f32>,
    poisoned_voxel: Vec<usize>,
    healed: AtomicBool,
}

impl FailingSource {
    fn new(inner: MemoryVolume<f32>, poisoned_voxel: Vec<usize>) -> Self {
        Self {
            inner,
            poisoned_voxel,
            healed: AtomicBool::new(false),
        }
    }

    fn heal(&self) {
        self.healed.store(true, Ordering::SeqCst);
    }
}

impl VolumeSource<f32> for FailingSource {
    fn shape(&self) -> Vec<usize> {
        self.inner.shape()
    }

    fn read(&self, region: &Region) -> SegResult<ArrayD<f32>> {
        if !self.healed.load(Ordering::SeqCst) && region.contains_point(&self.poisoned_voxel) {
            return Err(SegError::invalid_input(format!(
                "corrupt chunk at {region}"
            )));
        }
        self.inner.read(region)
    }
}

/// A sink wrapper counting writes, to verify exactly-once semantics.
struct CountingSink<'a> {
    inner: &'a MemoryVolume<u64>,
    writes: Mutex<usize>,
}

impl<'a> CountingSink<'a> {
    fn new(inner: &'a MemoryVolume<u64>) -> Self {
        Self {
            inner,
            writes: Mutex::new(0),
        }
    }

    fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

impl VolumeSource<u64> for CountingSink<'_> {
    fn shape(&self) -> Vec<usize> {
        self.inner.shape()
    }
    fn read(&self, region: &Region) -> SegResult<ArrayD<u64>> {
        self.inner.read(region)
    }
}

impl VolumeSink<u64> for CountingSink<'_> {
    fn write(&self, region: &Region, data: &ArrayD<u64>) -> SegResult<()> {
        *self.writes.lock().unwrap() += 1;
        self.inner.write(region, data)
    }
}

fn threshold_label_pipeline(min_size: Option<u64>) -> OperatorPipeline {
    let mut operators = vec![
        Operator::Threshold(Threshold::new(0.5)),
        Operator::ConnectedComponents(ConnectedComponents::default()),
    ];
    if let Some(min_voxels) = min_size {
        operators.push(Operator::SizeFilter(SizeFilter::new(min_voxels)));
    }
    OperatorPipeline::new(operators)
}

fn config() -> BlockwiseConfig {
    BlockwiseConfig::new().with_block_shape(vec![4, 4, 4])
}

/// Intensity volume with foreground (0.9) at the given voxels, 0.1 elsewhere.
fn intensity_with(shape: &[usize], foreground: &[[usize; 3]]) -> MemoryVolume<f32> {
    let mut array = ArrayD::from_elem(IxDyn(shape), 0.1f32);
    for &[z, y, x] in foreground {
        array[[z, y, x]] = 0.9;
    }
    MemoryVolume::from_array(array)
}

#[test]
fn component_crossing_block_boundaries_gets_one_global_id() {
    // a 1-voxel-thick bar along x, crossing both block boundaries
    let bar: Vec<[usize; 3]> = (1..7).map(|x| [2, 2, x]).collect();
    let source = intensity_with(&[8, 8, 8], &bar);
    let output = MemoryVolume::filled(vec![8, 8, 8], 0u64);

    let pipeline = SegmentationPipeline::new(config(), threshold_label_pipeline(None)).unwrap();
    let summary = pipeline
        .run(
            &Domain::new(vec![8, 8, 8]),
            &source,
            &output,
            &MemoryManifestStore::new(),
        )
        .unwrap();

    assert!(summary.is_complete());
    let stitch = summary.stitch.expect("stitch phase must run");
    assert_eq!(stitch.components, 1);

    let labels = output.snapshot();
    let id = labels[[2, 2, 1]];
    assert_ne!(id, 0);
    for x in 1..7 {
        assert_eq!(labels[[2, 2, x]], id, "bar must carry one global id");
    }
    // background untouched
    assert_eq!(labels[[0, 0, 0]], 0);
}

#[test]
fn disconnected_components_never_share_an_id() {
    let source = intensity_with(&[8, 8, 8], &[[0, 0, 0], [7, 7, 7]]);
    let output = MemoryVolume::filled(vec![8, 8, 8], 0u64);

    let pipeline = SegmentationPipeline::new(config(), threshold_label_pipeline(None)).unwrap();
    let summary = pipeline
        .run(
            &Domain::new(vec![8, 8, 8]),
            &source,
            &output,
            &MemoryManifestStore::new(),
        )
        .unwrap();

    assert_eq!(summary.stitch.unwrap().components, 2);
    let labels = output.snapshot();
    assert_ne!(labels[[0, 0, 0]], 0);
    assert_ne!(labels[[7, 7, 7]], 0);
    assert_ne!(labels[[0, 0, 0]], labels[[7, 7, 7]]);
}

#[test]
fn pipeline_is_deterministic() {
    // a few scattered structures, processed with the default parallel pool
    let mut foreground = Vec::new();
    for x in 0..8 {
        foreground.push([3, 4, x]);
    }
    foreground.push([0, 0, 0]);
    foreground.push([6, 2, 5]);
    foreground.push([6, 2, 6]);

    let run = || {
        let source = intensity_with(&[8, 8, 8], &foreground);
        let output = MemoryVolume::filled(vec![8, 8, 8], 0u64);
        let pipeline =
            SegmentationPipeline::new(config(), threshold_label_pipeline(None)).unwrap();
        pipeline
            .run(
                &Domain::new(vec![8, 8, 8]),
                &source,
                &output,
                &MemoryManifestStore::new(),
            )
            .unwrap();
        output.snapshot()
    };

    let first = run();
    let second = run();
    assert_eq!(first, second, "identical runs must be byte-identical");

    // metrics over identical outputs are identical too
    let engine = EvaluationEngine::new(0.5);
    let a = MemoryVolume::from_array(first.clone());
    let b = MemoryVolume::from_array(second);
    let truth = MemoryVolume::from_array(first);
    let (metrics_a, _) = engine.score_class(&a, &truth).unwrap();
    let (metrics_b, _) = engine.score_class(&b, &truth).unwrap();
    assert_eq!(metrics_a, metrics_b);
}

#[test]
fn interrupted_run_resumes_to_the_same_output() {
    let bar: Vec<[usize; 3]> = (0..8).map(|x| [2, 2, x]).collect();

    // reference: uninterrupted run
    let reference_output = MemoryVolume::filled(vec![8, 8, 8], 0u64);
    let pipeline = SegmentationPipeline::new(config(), threshold_label_pipeline(None)).unwrap();
    pipeline
        .run(
            &Domain::new(vec![8, 8, 8]),
            &intensity_with(&[8, 8, 8], &bar),
            &reference_output,
            &MemoryManifestStore::new(),
        )
        .unwrap();

    // interrupted: one block's input is unreadable on the first pass
    let source = FailingSource::new(intensity_with(&[8, 8, 8], &bar), vec![2, 2, 7]);
    let output = MemoryVolume::filled(vec![8, 8, 8], 0u64);
    let store = MemoryManifestStore::new();

    let summary = pipeline
        .run(&Domain::new(vec![8, 8, 8]), &source, &output, &store)
        .unwrap();
    assert!(!summary.is_complete());
    assert!(summary.failed > 0);
    assert!(summary.stitch.is_none(), "incomplete runs must not stitch");

    // resume after the storage recovers
    source.heal();
    let resumed = pipeline
        .run(&Domain::new(vec![8, 8, 8]), &source, &output, &store)
        .unwrap();
    assert!(resumed.is_complete());
    assert!(resumed.skipped > 0, "completed blocks must be skipped");

    assert_eq!(output.snapshot(), reference_output.snapshot());
}

#[test]
fn rerun_with_complete_manifest_writes_nothing() {
    let bar: Vec<[usize; 3]> = (0..6).map(|x| [1, 1, x]).collect();
    let source = intensity_with(&[8, 8, 8], &bar);
    let volume = MemoryVolume::filled(vec![8, 8, 8], 0u64);
    let store = MemoryManifestStore::new();
    let pipeline = SegmentationPipeline::new(config(), threshold_label_pipeline(None)).unwrap();

    let sink = CountingSink::new(&volume);
    pipeline
        .run(&Domain::new(vec![8, 8, 8]), &source, &sink, &store)
        .unwrap();
    let first_writes = sink.write_count();
    let first_snapshot = volume.snapshot();
    assert!(first_writes > 0);

    let summary = pipeline
        .run(&Domain::new(vec![8, 8, 8]), &source, &sink, &store)
        .unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.succeeded, 0);
    assert_eq!(
        sink.write_count(),
        first_writes,
        "a fully resumed run must not write"
    );
    assert_eq!(volume.snapshot(), first_snapshot);
}

#[test]
fn small_component_spanning_blocks_is_removed_globally() {
    // 3 voxels straddling the x = 4 block boundary: 2 in one block, 1 in
    // the other; each fragment alone would also be below the threshold,
    // the point is that removal happens after stitching, everywhere
    let speck = [[2, 2, 3], [2, 2, 4], [2, 2, 5]];
    // a 16-voxel plate that must survive
    let mut foreground: Vec<[usize; 3]> = speck.to_vec();
    for y in 0..4 {
        for x in 0..4 {
            foreground.push([6, y, x]);
        }
    }
    let source = intensity_with(&[8, 8, 8], &foreground);
    let output = MemoryVolume::filled(vec![8, 8, 8], 0u64);

    let pipeline =
        SegmentationPipeline::new(config(), threshold_label_pipeline(Some(10))).unwrap();
    let summary = pipeline
        .run(
            &Domain::new(vec![8, 8, 8]),
            &source,
            &output,
            &MemoryManifestStore::new(),
        )
        .unwrap();

    let stitch = summary.stitch.unwrap();
    assert_eq!(stitch.removed_components, 1);
    assert_eq!(stitch.removed_voxels, 3);
    assert_eq!(stitch.components, 1);

    let labels = output.snapshot();
    for &[z, y, x] in &speck {
        assert_eq!(labels[[z, y, x]], 0, "speck must be removed in every block");
    }
    assert_ne!(labels[[6, 0, 0]], 0);
}

#[test]
fn pipeline_output_scores_against_ground_truth() {
    // one plate of foreground; ground truth marks the same plate as id 1
    let mut foreground = Vec::new();
    for y in 2..6 {
        for x in 2..6 {
            foreground.push([4, y, x]);
        }
    }
    let source = intensity_with(&[8, 8, 8], &foreground);
    let output = MemoryVolume::filled(vec![8, 8, 8], 0u64);
    let pipeline = SegmentationPipeline::new(config(), threshold_label_pipeline(None)).unwrap();
    pipeline
        .run(
            &Domain::new(vec![8, 8, 8]),
            &source,
            &output,
            &MemoryManifestStore::new(),
        )
        .unwrap();

    let mut truth_array = ArrayD::zeros(IxDyn(&[8, 8, 8]));
    for &[z, y, x] in &foreground {
        truth_array[[z, y, x]] = 1u64;
    }
    let truth = MemoryVolume::from_array(truth_array);

    let engine = EvaluationEngine::new(0.5).with_block_shape(vec![4, 4, 4]);
    let (metrics, records) = engine.score_class(&output, &truth).unwrap();
    assert_eq!(metrics.true_positives, 1);
    assert_eq!(metrics.false_positives, 0);
    assert_eq!(metrics.false_negatives, 0);
    assert_eq!(metrics.f1, 1.0);
    assert_eq!(records[0].iou, 1.0);
}

#[test]
fn score_volume_reports_per_class_and_overall() {
    let make = |spans: &[(u64, usize, usize)]| {
        let mut array = ArrayD::zeros(IxDyn(&[1, 4, 16]));
        for &(id, start, end) in spans {
            for x in start..end {
                for y in 0..4 {
                    array[[0, y, x]] = id;
                }
            }
        }
        MemoryVolume::from_array(array)
    };
    let pred_mito = make(&[(1, 0, 8)]);
    let truth_mito = make(&[(1, 0, 8)]);
    let pred_er = make(&[(1, 8, 16)]);
    let truth_er = make(&[(2, 8, 12)]);

    let mut pred: BTreeMap<String, &dyn VolumeSource<u64>> = BTreeMap::new();
    pred.insert("mito".into(), &pred_mito);
    pred.insert("er".into(), &pred_er);
    let mut truth: BTreeMap<String, &dyn VolumeSource<u64>> = BTreeMap::new();
    truth.insert("mito".into(), &truth_mito);
    truth.insert("er".into(), &truth_er);

    let engine = EvaluationEngine::new(0.5);
    let report = engine.score_volume(&pred, &truth).unwrap();

    assert_eq!(report.classes.len(), 2);
    assert_eq!(report.classes["mito"].true_positives, 1);
    // er prediction covers 32 voxels against 16 true: IoU 0.5, matched
    assert_eq!(report.classes["er"].true_positives, 1);
    assert_eq!(report.overall.true_positives, 2);

    // report serializes for submission scoring
    let json = report.to_json().unwrap();
    let back: MetricsReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back, report);
}
