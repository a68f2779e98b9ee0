//! The chunked-array storage capability.
//!
//! The storage engine itself is out of scope; the pipeline only depends on
//! random-access read/write of rectangular regions, expressed by the
//! [`VolumeSource`] and [`VolumeSink`] traits. A backend wrapping a chunked
//! on-disk store implements these over its own chunk layout; the in-memory
//! [`MemoryVolume`] backs tests and small volumes.
//!
//! Backends should surface recoverable storage failures as
//! [`SegError::TransientIo`](crate::core::SegError::TransientIo) so the
//! executor can retry them; anything else is treated as permanent.

use std::sync::Mutex;

use ndarray::{ArrayD, IxDyn};

use crate::core::{SegError, SegResult};
use crate::domain::Region;

/// Read capability over a volumetric array.
pub trait VolumeSource<T>: Send + Sync {
    /// The array shape, one extent per axis.
    fn shape(&self) -> Vec<usize>;

    /// Reads a rectangular region into memory.
    fn read(&self, region: &Region) -> SegResult<ArrayD<T>>;
}

/// Write capability over a volumetric array. Supports partial and resumed
/// writes: distinct regions may be written in any order, across runs.
pub trait VolumeSink<T>: Send + Sync {
    /// Writes a rectangular region. The write must be visible to subsequent
    /// reads of the same region once this returns.
    fn write(&self, region: &Region, data: &ArrayD<T>) -> SegResult<()>;
}

/// An in-memory volume implementing both capabilities behind a mutex.
#[derive(Debug)]
pub struct MemoryVolume<T> {
    data: Mutex<ArrayD<T>>,
    shape: Vec<usize>,
}

impl<T: Clone> MemoryVolume<T> {
    /// Creates a volume of the given shape filled with `fill`.
    pub fn filled(shape: Vec<usize>, fill: T) -> Self {
        let data = ArrayD::from_elem(IxDyn(&shape), fill);
        Self {
            data: Mutex::new(data),
            shape,
        }
    }

    /// Wraps an existing array.
    pub fn from_array(array: ArrayD<T>) -> Self {
        let shape = array.shape().to_vec();
        Self {
            data: Mutex::new(array),
            shape,
        }
    }

    /// A copy of the full array, for assertions and small-volume callers.
    pub fn snapshot(&self) -> ArrayD<T> {
        self.data.lock().unwrap().clone()
    }
}

impl<T: Clone + Send> VolumeSource<T> for MemoryVolume<T> {
    fn shape(&self) -> Vec<usize> {
        self.shape.clone()
    }

    fn read(&self, region: &Region) -> SegResult<ArrayD<T>> {
        let guard = self.data.lock().unwrap();
        region.extract(&guard)
    }
}

impl<T: Clone + Send> VolumeSink<T> for MemoryVolume<T> {
    fn write(&self, region: &Region, data: &ArrayD<T>) -> SegResult<()> {
        if data.shape() != region.shape() {
            return Err(SegError::invalid_input(format!(
                "write shape {:?} does not match region {region}",
                data.shape()
            )));
        }
        let mut guard = self.data.lock().unwrap();
        region.assign_into(&mut guard, data)
    }
}
