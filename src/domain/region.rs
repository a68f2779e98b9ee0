//! Axis-aligned rectangular regions of an N-dimensional index space.

use ndarray::{ArrayD, SliceInfoElem};
use serde::{Deserialize, Serialize};

use crate::core::{SegError, SegResult};

/// A rectangular sub-region of an N-dimensional index space, described by a
/// per-axis offset and shape.
///
/// Regions are half-open boxes: axis `d` covers `offset[d] .. offset[d] + shape[d]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    offset: Vec<usize>,
    shape: Vec<usize>,
}

impl Region {
    /// Creates a region from a per-axis offset and shape.
    ///
    /// Offset and shape must have the same number of axes.
    pub fn new(offset: Vec<usize>, shape: Vec<usize>) -> Self {
        assert_eq!(
            offset.len(),
            shape.len(),
            "region offset and shape must have the same number of axes"
        );
        Self { offset, shape }
    }

    /// A region at the origin with the given shape.
    pub fn from_shape(shape: Vec<usize>) -> Self {
        let offset = vec![0; shape.len()];
        Self { offset, shape }
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Per-axis start coordinates.
    pub fn offset(&self) -> &[usize] {
        &self.offset
    }

    /// Per-axis extents.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Per-axis exclusive end coordinates.
    pub fn end(&self) -> Vec<usize> {
        self.offset
            .iter()
            .zip(&self.shape)
            .map(|(&o, &s)| o + s)
            .collect()
    }

    /// Total voxel count.
    pub fn num_voxels(&self) -> usize {
        self.shape.iter().product()
    }

    /// Whether any axis has zero extent.
    pub fn is_empty(&self) -> bool {
        self.shape.iter().any(|&s| s == 0)
    }

    /// Whether `point` lies inside this region.
    pub fn contains_point(&self, point: &[usize]) -> bool {
        point.len() == self.ndim()
            && point
                .iter()
                .zip(self.offset.iter().zip(&self.shape))
                .all(|(&p, (&o, &s))| p >= o && p < o + s)
    }

    /// Whether `other` lies entirely inside this region.
    pub fn contains(&self, other: &Region) -> bool {
        other.ndim() == self.ndim()
            && other
                .offset
                .iter()
                .zip(&other.shape)
                .zip(self.offset.iter().zip(&self.shape))
                .all(|((&oo, &os), (&so, &ss))| oo >= so && oo + os <= so + ss)
    }

    /// The intersection of two regions, or None when they do not overlap.
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        if other.ndim() != self.ndim() {
            return None;
        }
        let mut offset = Vec::with_capacity(self.ndim());
        let mut shape = Vec::with_capacity(self.ndim());
        for d in 0..self.ndim() {
            let start = self.offset[d].max(other.offset[d]);
            let end = (self.offset[d] + self.shape[d]).min(other.offset[d] + other.shape[d]);
            if start >= end {
                return None;
            }
            offset.push(start);
            shape.push(end - start);
        }
        Some(Region::new(offset, shape))
    }

    /// Translates this region into the local coordinates of an enclosing
    /// region, so it can be used to slice an array read for `outer`.
    ///
    /// `outer` must contain `self`.
    pub fn relative_to(&self, outer: &Region) -> Region {
        debug_assert!(outer.contains(self), "region is not inside outer");
        let offset = self
            .offset
            .iter()
            .zip(&outer.offset)
            .map(|(&o, &base)| o - base)
            .collect();
        Region::new(offset, self.shape.clone())
    }

    fn slice_elems(&self) -> Vec<SliceInfoElem> {
        self.offset
            .iter()
            .zip(&self.shape)
            .map(|(&o, &s)| SliceInfoElem::Slice {
                start: o as isize,
                end: Some((o + s) as isize),
                step: 1,
            })
            .collect()
    }

    /// Copies this region out of `array`, interpreting the region in the
    /// array's own (local) coordinates.
    pub fn extract<T: Clone>(&self, array: &ArrayD<T>) -> SegResult<ArrayD<T>> {
        self.check_within(array.shape())?;
        let elems = self.slice_elems();
        Ok(array.slice(elems.as_slice()).to_owned())
    }

    /// Writes `data` into this region of `array`, interpreting the region in
    /// the array's own (local) coordinates.
    pub fn assign_into<T: Clone>(&self, array: &mut ArrayD<T>, data: &ArrayD<T>) -> SegResult<()> {
        self.check_within(array.shape())?;
        if data.shape() != self.shape.as_slice() {
            return Err(SegError::invalid_input(format!(
                "data shape {:?} does not match region shape {:?}",
                data.shape(),
                self.shape
            )));
        }
        let elems = self.slice_elems();
        array.slice_mut(elems.as_slice()).assign(data);
        Ok(())
    }

    fn check_within(&self, array_shape: &[usize]) -> SegResult<()> {
        if array_shape.len() != self.ndim() {
            return Err(SegError::invalid_input(format!(
                "region has {} axes but array has {}",
                self.ndim(),
                array_shape.len()
            )));
        }
        for d in 0..self.ndim() {
            if self.offset[d] + self.shape[d] > array_shape[d] {
                return Err(SegError::invalid_input(format!(
                    "region end {} exceeds array extent {} on axis {d}",
                    self.offset[d] + self.shape[d],
                    array_shape[d]
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}+{:?}", self.offset, self.shape)
    }
}
