use crate::array;
use crate::error::PulseAvgError;
use crate::models;

use ndarray::ArrayView4;

/// Trait for array elements.
///
/// Every element type can be accumulated as an [f32], whatever its native width.
pub trait Element:
    Clone
    + Copy
    + Send
    + Sync
    + std::fmt::Debug
    + num_traits::AsPrimitive<f32>
    + zerocopy::AsBytes
    + zerocopy::FromBytes
    + 'static
{
    /// Runtime data type corresponding to this type.
    const DTYPE: models::DType;
}

macro_rules! impl_element {
    ($($t:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $t {
                const DTYPE: models::DType = models::DType::$dtype;
            }
        )*
    };
}

impl_element!(
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
    f32 => Float32,
    f64 => Float64,
);

/// Trait for reductions over a block of frames.
///
/// This forms the contract between the scheduler and the numerical code.
pub trait Operation {
    /// Result of the operation on one block of frames.
    type Output;

    /// Execute the operation.
    ///
    /// # Arguments
    ///
    /// * `frames`: Decoded frames to operate on.
    /// * `pulses_per_train`: Number of consecutive frames forming one train.
    fn execute(
        frames: &array::RawFrames,
        pulses_per_train: usize,
    ) -> Result<Self::Output, PulseAvgError>;
}

/// Trait for operations on numerical data.
///
/// This trait provides an entry point into the type system based on the runtime `dtype` value.
pub trait NumOperation {
    /// Result of the operation on one block of frames.
    type Output;

    fn execute_t<T: Element>(
        frames: ArrayView4<T>,
        pulses_per_train: usize,
    ) -> Result<Self::Output, PulseAvgError>;
}

impl<O: NumOperation> Operation for O {
    type Output = O::Output;

    /// Execute the operation.
    ///
    /// This method dispatches to `execute_t` based on the `dtype`.
    fn execute(
        frames: &array::RawFrames,
        pulses_per_train: usize,
    ) -> Result<Self::Output, PulseAvgError> {
        // Convert runtime data type into concrete types.
        match frames.dtype {
            models::DType::Int16 => {
                Self::execute_t::<i16>(array::build_frames(frames)?, pulses_per_train)
            }
            models::DType::Int32 => {
                Self::execute_t::<i32>(array::build_frames(frames)?, pulses_per_train)
            }
            models::DType::Int64 => {
                Self::execute_t::<i64>(array::build_frames(frames)?, pulses_per_train)
            }
            models::DType::Uint16 => {
                Self::execute_t::<u16>(array::build_frames(frames)?, pulses_per_train)
            }
            models::DType::Uint32 => {
                Self::execute_t::<u32>(array::build_frames(frames)?, pulses_per_train)
            }
            models::DType::Uint64 => {
                Self::execute_t::<u64>(array::build_frames(frames)?, pulses_per_train)
            }
            models::DType::Float32 => {
                Self::execute_t::<f32>(array::build_frames(frames)?, pulses_per_train)
            }
            models::DType::Float64 => {
                Self::execute_t::<f64>(array::build_frames(frames)?, pulses_per_train)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::Array4;

    struct TypeNameOp {}

    impl NumOperation for TypeNameOp {
        type Output = (&'static str, Vec<usize>);

        fn execute_t<T: Element>(
            frames: ArrayView4<T>,
            _pulses_per_train: usize,
        ) -> Result<Self::Output, PulseAvgError> {
            Ok((std::any::type_name::<T>(), frames.shape().to_vec()))
        }
    }

    #[test]
    fn element_dtypes() {
        assert_eq!(models::DType::Uint16, <u16 as Element>::DTYPE);
        assert_eq!(models::DType::Float64, <f64 as Element>::DTYPE);
    }

    #[test]
    fn num_operation_u16() {
        let frames = array::RawFrames::from_array(Array4::<u16>::zeros((4, 1, 2, 3)).view());
        let (name, shape) = TypeNameOp::execute(&frames, 2).unwrap();
        assert_eq!("u16", name);
        assert_eq!(vec![4, 1, 2, 3], shape);
    }

    #[test]
    fn num_operation_f64() {
        let frames = array::RawFrames::from_array(Array4::<f64>::zeros((1, 1, 1, 1)).view());
        let (name, _) = TypeNameOp::execute(&frames, 1).unwrap();
        assert_eq!("f64", name);
    }
}
