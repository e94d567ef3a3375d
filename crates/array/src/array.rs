use std::fmt;

use bytemuck::Pod;
use mipstore_geom::PointN;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DType;

/// Memory layout of a buffer's samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    /// Row-major, axis 0 fastest. Wire tag: the empty string.
    #[default]
    #[serde(rename = "")]
    RowMajor,
    /// Samples ordered by hz address within a block. Wire tag: `hzorder`.
    #[serde(rename = "hzorder")]
    Hz,
}

impl Layout {
    pub fn wire_tag(self) -> &'static str {
        match self {
            Self::RowMajor => "",
            Self::Hz => "hzorder",
        }
    }

    pub fn from_wire_tag(tag: &str) -> Option<Self> {
        match tag {
            "" => Some(Self::RowMajor),
            "hzorder" => Some(Self::Hz),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ArrayError {
    #[error("buffer is {got} bytes, dims {dims} of {dtype} need {want}")]
    SizeMismatch {
        got: usize,
        want: usize,
        dims: PointN,
        dtype: DType,
    },

    #[error("sample width {0} has no {1}-byte typed view")]
    BadTypedView(usize, usize),
}

/// An owned N-dimensional sample buffer.
///
/// `dims` counts samples per axis; the backing bytes hold
/// `dims.inner_product()` samples of `dtype`, laid out per `layout`.
#[derive(Clone, PartialEq)]
pub struct Array {
    dims: PointN,
    dtype: DType,
    layout: Layout,
    data: Vec<u8>,
}

impl Array {
    /// Allocates a zero-filled row-major buffer.
    pub fn zeroed(dims: PointN, dtype: DType) -> Self {
        let bytes = dims.inner_product() as usize * dtype.sample_bytes();
        Self {
            dims,
            dtype,
            layout: Layout::RowMajor,
            data: vec![0; bytes],
        }
    }

    /// Allocates a row-major buffer filled with a scalar value.
    pub fn filled(dims: PointN, dtype: DType, value: f64) -> Self {
        let mut arr = Self::zeroed(dims, dtype);
        arr.fill(value);
        arr
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Wraps existing bytes, verifying the size.
    pub fn from_bytes(
        dims: PointN,
        dtype: DType,
        layout: Layout,
        data: Vec<u8>,
    ) -> Result<Self, ArrayError> {
        let want = dims.inner_product() as usize * dtype.sample_bytes();
        if data.len() != want {
            return Err(ArrayError::SizeMismatch {
                got: data.len(),
                want,
                dims,
                dtype,
            });
        }
        Ok(Self {
            dims,
            dtype,
            layout,
            data,
        })
    }

    pub fn dims(&self) -> PointN {
        self.dims
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn nsamples(&self) -> i64 {
        self.dims.inner_product()
    }

    pub fn sample_size(&self) -> usize {
        self.dtype.sample_bytes()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Overwrites every sample with a scalar value (repeated per component).
    pub fn fill(&mut self, value: f64) {
        let sample = self.dtype.fill_sample(value);
        if sample.iter().all(|&b| b == 0) {
            self.data.fill(0);
            return;
        }
        for chunk in self.data.chunks_exact_mut(sample.len()) {
            chunk.copy_from_slice(&sample);
        }
    }

    pub fn sample(&self, index: usize) -> &[u8] {
        let ss = self.sample_size();
        &self.data[index * ss..(index + 1) * ss]
    }

    pub fn set_sample(&mut self, index: usize, bytes: &[u8]) {
        let ss = self.sample_size();
        debug_assert_eq!(bytes.len(), ss);
        self.data[index * ss..(index + 1) * ss].copy_from_slice(bytes);
    }

    /// Typed view of the whole buffer; `T` must exactly span one sample.
    pub fn as_typed<T: Pod>(&self) -> Result<&[T], ArrayError> {
        if std::mem::size_of::<T>() != self.sample_size() {
            return Err(ArrayError::BadTypedView(
                self.sample_size(),
                std::mem::size_of::<T>(),
            ));
        }
        Ok(bytemuck::cast_slice(&self.data))
    }

    pub fn as_typed_mut<T: Pod>(&mut self) -> Result<&mut [T], ArrayError> {
        if std::mem::size_of::<T>() != self.sample_size() {
            return Err(ArrayError::BadTypedView(
                self.sample_size(),
                std::mem::size_of::<T>(),
            ));
        }
        Ok(bytemuck::cast_slice_mut(&mut self.data))
    }

    /// Row-major sample index of a pixel coordinate (axis 0 fastest).
    pub fn pixel_index(&self, pixel: PointN) -> usize {
        debug_assert_eq!(self.layout, Layout::RowMajor);
        self.dims.stride().dot(pixel) as usize
    }

    /// Reads one scalar sample at a row-major pixel coordinate (tests and
    /// tools; the hot paths go through the kernels).
    pub fn value_at<T: Pod>(&self, pixel: PointN) -> T {
        let bytes = self.sample(self.pixel_index(pixel));
        bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<T>()])
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("dims", &self.dims)
            .field("dtype", &self.dtype)
            .field("layout", &self.layout)
            .field("bytes", &self.data.len())
            .finish()
    }
}
