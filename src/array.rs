//! Functions and utilities for working with [ndarray] objects.

use crate::error::PulseAvgError;
use crate::models;
use crate::operation::Element;

use ndarray::prelude::*;
use ndarray::CowArray;
// Bring trait into scope to use as_bytes method.
use zerocopy::AsBytes;

/// Allocate an empty byte buffer that is 8-byte aligned.
///
/// Frame data is reinterpreted as its element type in place, so the buffer must be at least as
/// aligned as the widest supported element. The buffer must not grow beyond `capacity`, since
/// reallocation would lose the alignment.
///
/// # Arguments
///
/// * `capacity`: Number of bytes that will be written to the buffer
pub fn aligned_buffer(capacity: usize) -> Vec<u8> {
    let mut buf = maligned::align_first::<u8, maligned::A8>(capacity);
    buf.clear();
    buf
}

/// Decoded frames of one detector source, in native byte order.
#[derive(Clone, Debug, PartialEq)]
pub struct RawFrames {
    /// Data type of the elements
    pub dtype: models::DType,
    /// Shape as (frames, extra, rows, columns)
    pub shape: [usize; 4],
    /// Element bytes. 8-byte aligned.
    pub data: Vec<u8>,
}

impl RawFrames {
    /// Return a new RawFrames object, checking that the data matches the shape.
    pub fn new(
        dtype: models::DType,
        shape: [usize; 4],
        data: Vec<u8>,
    ) -> Result<Self, PulseAvgError> {
        models::validate_raw_size(data.len(), dtype, &shape)?;
        Ok(Self { dtype, shape, data })
    }

    /// Copy the elements of an array into a new RawFrames object.
    pub fn from_array<T: Element>(array: ArrayView4<T>) -> Self {
        let array = array.as_standard_layout();
        // Standard layout arrays always have a contiguous slice.
        let bytes = array.as_slice().unwrap_or_default().as_bytes();
        let mut data = aligned_buffer(bytes.len());
        data.extend_from_slice(bytes);
        let (frames, extra, rows, cols) = array.dim();
        Self {
            dtype: T::DTYPE,
            shape: [frames, extra, rows, cols],
            data,
        }
    }
}

/// Convert from bytes to `&[T]`.
///
/// Zerocopy provides a mechanism for converting between types.
/// Correct alignment of the data is necessary.
///
/// # Arguments
///
/// * `data`: Bytes containing data to convert.
fn from_bytes<T: zerocopy::FromBytes>(data: &[u8]) -> Result<&[T], PulseAvgError> {
    let layout = zerocopy::LayoutVerified::<_, [T]>::new_slice(data).ok_or(
        PulseAvgError::FromBytes {
            type_name: std::any::type_name::<T>(),
        },
    )?;
    Ok(layout.into_slice())
}

/// Build an [ndarray::ArrayView4] over decoded frames.
///
/// The resulting array borrows the data of `frames`, so no copying takes place.
///
/// # Arguments
///
/// * `frames`: Decoded frames. `T` must match their data type.
pub fn build_frames<T: Element>(frames: &RawFrames) -> Result<ArrayView4<T>, PulseAvgError> {
    if frames.dtype != T::DTYPE {
        return Err(PulseAvgError::FromBytes {
            type_name: std::any::type_name::<T>(),
        });
    }
    let data = from_bytes::<T>(&frames.data)?;
    ArrayView4::<T>::from_shape(frames.shape, data).map_err(PulseAvgError::ShapeInvalid)
}

/// Select the first entry of the extra axis and split frames into trains.
///
/// Returns an array of shape (trains, pulses per train, rows, columns). The data is only copied
/// if the selection is not contiguous.
///
/// # Arguments
///
/// * `frames`: Frames of shape (frames, extra, rows, columns).
/// * `pulses_per_train`: Number of consecutive frames forming one train.
pub fn split_trains<T: Clone>(
    frames: ArrayView4<T>,
    pulses_per_train: usize,
) -> Result<CowArray<T, Ix4>, PulseAvgError> {
    if pulses_per_train == 0 {
        return Err(PulseAvgError::ZeroParameter {
            name: "pulses_per_train",
        });
    }
    let selected = frames.index_axis_move(Axis(1), 0);
    let (n, rows, cols) = selected.dim();
    if n % pulses_per_train != 0 {
        return Err(PulseAvgError::TrainsNotDivisible {
            name: "frame block".to_string(),
            frames: n,
            pulses_per_train,
        });
    }
    let selected = if selected.is_standard_layout() {
        CowArray::from(selected)
    } else {
        CowArray::from(selected.to_owned())
    };
    let trains = selected.into_shape((n / pulses_per_train, pulses_per_train, rows, cols))?;
    Ok(trains)
}
