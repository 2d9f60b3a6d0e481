//! Splitting host batches across devices.
//!
//! Arrays carry the batch on axis 0. A padded batch of `n * d` examples is
//! sharded into `[n, d, ...]` so device `i` sees `[d, ...]`.

use ndarray::{stack, ArrayD, ArrayViewD, Axis, IxDyn, Slice};
use num_traits::Zero;
use rayon::prelude::*;
use tracing::trace;

use crate::error::{BigVisionError, Result};

/// The set of devices a batch is spread over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMesh {
    n_devices: usize,
}

impl DeviceMesh {
    pub fn new(n_devices: usize) -> Result<Self> {
        if n_devices == 0 {
            return Err(BigVisionError::InvalidArgument(
                "device mesh needs at least one device".to_string(),
            ));
        }
        Ok(Self { n_devices })
    }

    /// One device per available host thread.
    pub fn local() -> Self {
        let n_devices = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self { n_devices }
    }

    pub fn n_devices(&self) -> usize {
        self.n_devices
    }

    /// Examples each device receives for a batch of `batch` examples.
    pub fn per_device_batch(&self, batch: usize, min_device_batch: Option<usize>) -> usize {
        let needed = (batch + self.n_devices - 1) / self.n_devices;
        needed.max(min_device_batch.unwrap_or(0))
    }

    /// Zero-pads the batch axis up to `n_devices * per_device_batch`.
    pub fn pad<T: Clone + Zero>(
        &self,
        x: ArrayViewD<'_, T>,
        min_device_batch: Option<usize>,
    ) -> Result<ArrayD<T>> {
        let batch = batch_size(&x)?;
        let target = self.per_device_batch(batch, min_device_batch) * self.n_devices;
        if target == batch {
            return Ok(x.to_owned());
        }
        let mut pad_shape = x.shape().to_vec();
        pad_shape[0] = target - batch;
        trace!(batch, padded = target, "padding batch");
        let zeros = ArrayD::<T>::zeros(IxDyn(&pad_shape));
        ndarray::concatenate(Axis(0), &[x.view(), zeros.view()]).map_err(BigVisionError::shape)
    }

    /// `[n * d, ...]` to `[n, d, ...]`.
    pub fn shard<T: Clone>(&self, x: ArrayD<T>) -> Result<ArrayD<T>> {
        let batch = batch_size(&x.view())?;
        if batch % self.n_devices != 0 {
            return Err(BigVisionError::Shape(format!(
                "batch of {} does not split over {} devices",
                batch, self.n_devices
            )));
        }
        let mut shape = vec![self.n_devices, batch / self.n_devices];
        shape.extend_from_slice(&x.shape()[1..]);
        reshape(x, &shape)
    }

    /// `[n, d, ...]` to `[n * d, ...]`.
    pub fn unshard<T: Clone>(&self, x: ArrayD<T>) -> Result<ArrayD<T>> {
        if x.ndim() < 2 || x.shape()[0] != self.n_devices {
            return Err(BigVisionError::Shape(format!(
                "expected a leading device axis of {}, got shape {:?}",
                self.n_devices,
                x.shape()
            )));
        }
        let mut shape = vec![x.shape()[0] * x.shape()[1]];
        shape.extend_from_slice(&x.shape()[2..]);
        reshape(x, &shape)
    }

    /// Pads and shards every input, calls `f` once per device on that
    /// device's slices, then gathers the outputs and strips the padding.
    ///
    /// Arguments that are not batched are captured by `f`. With
    /// `min_device_batch` set, `f` sees the same per-device shape for every
    /// batch size up to `n_devices * min_device_batch`.
    pub fn pad_shard_unpad<T, O, F>(
        &self,
        batched: &[ArrayViewD<'_, T>],
        min_device_batch: Option<usize>,
        f: F,
    ) -> Result<ArrayD<O>>
    where
        T: Clone + Zero + Send + Sync,
        O: Clone + Send,
        F: Fn(&[ArrayViewD<'_, T>]) -> ArrayD<O> + Sync,
    {
        let first = batched.first().ok_or_else(|| {
            BigVisionError::InvalidArgument("pad_shard_unpad needs at least one batched input".to_string())
        })?;
        let batch = batch_size(first)?;
        for x in batched {
            if batch_size(x)? != batch {
                return Err(BigVisionError::Shape(format!(
                    "batched inputs disagree on batch size: {} vs {}",
                    batch,
                    x.shape()[0]
                )));
            }
        }

        let per_device = self.per_device_batch(batch, min_device_batch);
        let shards = batched
            .iter()
            .map(|x| self.pad(x.view(), min_device_batch).and_then(|p| self.shard(p)))
            .collect::<Result<Vec<_>>>()?;

        let outputs: Vec<ArrayD<O>> = (0..self.n_devices)
            .into_par_iter()
            .map(|device| {
                let views: Vec<ArrayViewD<'_, T>> =
                    shards.iter().map(|s| s.index_axis(Axis(0), device)).collect();
                f(&views)
            })
            .collect();

        for out in &outputs {
            if out.ndim() == 0 || out.shape()[0] != per_device {
                return Err(BigVisionError::Shape(format!(
                    "per-device output has shape {:?}, expected leading dim {}",
                    out.shape(),
                    per_device
                )));
            }
        }

        let views: Vec<_> = outputs.iter().map(|o| o.view()).collect();
        let gathered = stack(Axis(0), &views).map_err(BigVisionError::shape)?;
        let flat = self.unshard(gathered)?;
        Ok(flat.slice_axis(Axis(0), Slice::from(0..batch)).to_owned())
    }
}

fn batch_size<T>(x: &ArrayViewD<'_, T>) -> Result<usize> {
    x.shape()
        .first()
        .copied()
        .ok_or_else(|| BigVisionError::Shape("scalar input has no batch axis".to_string()))
}

fn reshape<T: Clone>(x: ArrayD<T>, shape: &[usize]) -> Result<ArrayD<T>> {
    let x = if x.is_standard_layout() {
        x
    } else {
        x.as_standard_layout().into_owned()
    };
    x.into_shape(IxDyn(shape)).map_err(BigVisionError::shape)
}
