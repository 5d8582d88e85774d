//! Numerical operations.
//!
//! Each operation is implemented as a struct that implements the
//! [NumOperation](crate::operation::NumOperation) trait.

use crate::array;
use crate::error::PulseAvgError;
use crate::operation::{Element, NumOperation};

use ndarray::{Array3, ArrayView4, Axis};
use num_traits::AsPrimitive;

/// Per-pulse sums over a number of trains.
///
/// Partial sums of disjoint blocks of trains can be merged in any order.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialSum {
    /// Sum over trains, of shape (pulse, row, column)
    pub sum: Array3<f32>,
    /// Number of trains summed
    pub trains: usize,
}

impl PartialSum {
    /// Add the trains of another partial sum to this one.
    pub fn merge(&mut self, other: &PartialSum) -> Result<(), PulseAvgError> {
        if self.sum.shape() != other.sum.shape() {
            return Err(PulseAvgError::ShapeInvalid(ndarray::ShapeError::from_kind(
                ndarray::ErrorKind::IncompatibleShape,
            )));
        }
        self.sum += &other.sum;
        self.trains += other.trains;
        Ok(())
    }

    /// Divide the sums by the number of trains.
    pub fn finish(self) -> Result<Array3<f32>, PulseAvgError> {
        if self.trains == 0 {
            return Err(PulseAvgError::ZeroParameter { name: "trains" });
        }
        Ok(self.sum / self.trains as f32)
    }
}

/// Sum a block of frames over trains, per pulse and pixel.
///
/// Accumulation is performed in [f32] whatever the element type.
pub struct TrainSum {}

impl NumOperation for TrainSum {
    type Output = PartialSum;

    fn execute_t<T: Element>(
        frames: ArrayView4<T>,
        pulses_per_train: usize,
    ) -> Result<PartialSum, PulseAvgError> {
        let trains = array::split_trains(frames, pulses_per_train)?;
        let sum = trains.fold_axis(Axis(0), 0.0_f32, |acc, val| *acc + val.as_());
        Ok(PartialSum {
            sum,
            trains: trains.len_of(Axis(0)),
        })
    }
}

/// Mean over trains of a block of frames, per pulse and pixel.
pub struct TrainMean {}

impl NumOperation for TrainMean {
    type Output = Array3<f32>;

    fn execute_t<T: Element>(
        frames: ArrayView4<T>,
        pulses_per_train: usize,
    ) -> Result<Array3<f32>, PulseAvgError> {
        TrainSum::execute_t(frames, pulses_per_train)?.finish()
    }
}
