//! Lazily evaluated arrays.
//!
//! A [LazyArray] describes an array computation without performing it. Evaluation is done by a
//! [Client](crate::cluster::Client), which splits each per-module mean into tasks of whole trains.

use crate::error::PulseAvgError;
use crate::models::ModuleMetadata;
use crate::operation::Operation;
use crate::operations::{PartialSum, TrainSum};
use crate::source::DataSource;

use ndarray::{Array3, ArrayD, Axis};
use std::ops::Range;
use std::sync::Arc;
use tracing::warn;

/// Mean over trains of one detector source, per pulse and pixel.
///
/// The result has shape (pulse, row, column).
#[derive(Clone, Debug)]
pub struct ModuleMean {
    source: Arc<dyn DataSource>,
    name: String,
    metadata: Arc<ModuleMetadata>,
    pulses_per_train: usize,
    trains_per_task: usize,
}

impl ModuleMean {
    /// Describe the mean over trains of a source.
    ///
    /// Fails if the frame count of the source is not a whole number of trains.
    ///
    /// # Arguments
    ///
    /// * `source`: Data source holding the frames
    /// * `name`: Detector source name
    /// * `pulses_per_train`: Number of consecutive frames forming one train
    /// * `trains_per_task`: Number of trains reduced by each task
    pub fn new(
        source: Arc<dyn DataSource>,
        name: &str,
        pulses_per_train: usize,
        trains_per_task: usize,
    ) -> Result<Self, PulseAvgError> {
        if pulses_per_train == 0 {
            return Err(PulseAvgError::ZeroParameter {
                name: "pulses_per_train",
            });
        }
        if trains_per_task == 0 {
            return Err(PulseAvgError::ZeroParameter {
                name: "trains_per_task",
            });
        }
        let metadata = source.metadata(name)?;
        if metadata.frames() % pulses_per_train != 0 {
            return Err(PulseAvgError::TrainsNotDivisible {
                name: name.to_string(),
                frames: metadata.frames(),
                pulses_per_train,
            });
        }
        Ok(Self {
            source,
            name: name.to_string(),
            metadata,
            pulses_per_train,
            trains_per_task,
        })
    }

    /// Detector source name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of trains averaged.
    pub fn trains(&self) -> usize {
        self.metadata.frames() / self.pulses_per_train
    }

    /// Shape of the result as (pulse, row, column).
    pub fn shape(&self) -> [usize; 3] {
        let (rows, cols) = self.metadata.pixel_shape();
        [self.pulses_per_train, rows, cols]
    }

    /// Check the recorded frame count of every train against the pulses per train.
    ///
    /// Sources without a train index cannot be checked and pass with a warning.
    pub fn validate_trains(&self) -> Result<(), PulseAvgError> {
        if self.metadata.trains.is_empty() {
            warn!("{} has no train index, skipping train validation", self.name);
            return Ok(());
        }
        match self
            .metadata
            .trains
            .iter()
            .find(|train| train.frames != self.pulses_per_train)
        {
            Some(train) => Err(PulseAvgError::IrregularTrain {
                train_id: train.train_id,
                frames: train.frames,
                expected: self.pulses_per_train,
            }),
            None => Ok(()),
        }
    }

    /// Frame ranges of the tasks, each a whole number of trains.
    pub fn tasks(&self) -> Vec<Range<usize>> {
        let frames = self.metadata.frames();
        let task_frames = self.trains_per_task * self.pulses_per_train;
        (0..frames)
            .step_by(task_frames)
            .map(|start| start..frames.min(start + task_frames))
            .collect()
    }

    /// Estimated memory in bytes needed to run the task for a frame range.
    ///
    /// Counts the frames of the task, its partial sum and the largest chunk it overlaps. Chunks
    /// are decoded whole and one at a time, with a copy held for each decoding stage.
    pub fn task_memory(&self, frames: &Range<usize>) -> usize {
        let frame_bytes = self.metadata.frame_bytes();
        let sum_bytes = self.shape().iter().product::<usize>() * std::mem::size_of::<f32>();
        let chunk_bytes = self
            .metadata
            .chunks_overlapping(frames.start, frames.end)
            .map(|chunk| chunk.frames * frame_bytes)
            .max()
            .unwrap_or(0);
        let stages = 1
            + usize::from(self.metadata.compression.is_some())
            + self.metadata.filters.as_ref().map_or(0, Vec::len);
        frames.len() * frame_bytes + chunk_bytes * stages + sum_bytes
    }

    /// Read and reduce the frames of one task.
    pub fn run_task(&self, frames: Range<usize>) -> Result<PartialSum, PulseAvgError> {
        let raw = self.source.read_frames(&self.name, frames)?;
        TrainSum::execute(&raw, self.pulses_per_train)
    }
}

/// A lazily evaluated array of [f32].
#[derive(Clone, Debug)]
pub enum LazyArray {
    /// Mean over trains of a single module
    ModuleMean(ModuleMean),
    /// Arrays of equal shape stacked along a new leading axis
    Stack(Vec<LazyArray>),
    /// An array that has already been evaluated
    Concrete(ArrayD<f32>),
}

impl LazyArray {
    /// Stack arrays of equal shape along a new leading axis.
    ///
    /// Element `i` of the result is `arrays[i]`.
    pub fn stack(arrays: Vec<LazyArray>) -> Result<Self, PulseAvgError> {
        let first = arrays.first().ok_or(PulseAvgError::EmptyStack)?;
        let expected = first.shape();
        for (index, array) in arrays.iter().enumerate().skip(1) {
            let actual = array.shape();
            if actual != expected {
                return Err(PulseAvgError::StackShapeMismatch {
                    index,
                    expected,
                    actual,
                });
            }
        }
        Ok(Self::Stack(arrays))
    }

    /// Shape of the evaluated array.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Self::ModuleMean(mean) => mean.shape().to_vec(),
            Self::Stack(arrays) => {
                let mut shape = vec![arrays.len()];
                if let Some(first) = arrays.first() {
                    shape.extend(first.shape());
                }
                shape
            }
            Self::Concrete(array) => array.shape().to_vec(),
        }
    }

    /// Per-module means that need evaluating, depth first.
    pub fn module_means(&self) -> Vec<&ModuleMean> {
        match self {
            Self::ModuleMean(mean) => vec![mean],
            Self::Stack(arrays) => arrays.iter().flat_map(|a| a.module_means()).collect(),
            Self::Concrete(_) => vec![],
        }
    }

    /// Build the evaluated array from evaluated per-module means.
    ///
    /// # Arguments
    ///
    /// * `means`: Results of [LazyArray::module_means], in the same order
    pub fn assemble(
        &self,
        means: &mut impl Iterator<Item = Array3<f32>>,
    ) -> Result<ArrayD<f32>, PulseAvgError> {
        match self {
            Self::ModuleMean(_) => means.next().map(|mean| mean.into_dyn()).ok_or(
                PulseAvgError::ShapeInvalid(ndarray::ShapeError::from_kind(
                    ndarray::ErrorKind::OutOfBounds,
                )),
            ),
            Self::Stack(arrays) => {
                let parts = arrays
                    .iter()
                    .map(|array| array.assemble(means))
                    .collect::<Result<Vec<_>, _>>()?;
                let views = parts.iter().map(|part| part.view()).collect::<Vec<_>>();
                Ok(ndarray::stack(Axis(0), &views)?)
            }
            Self::Concrete(array) => Ok(array.clone()),
        }
    }
}

impl From<ArrayD<f32>> for LazyArray {
    fn from(array: ArrayD<f32>) -> Self {
        Self::Concrete(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, SourceLayout};

    use ndarray::{array, Array, Array4};

    fn source(frames: usize, train_frames: Option<Vec<usize>>) -> Arc<dyn DataSource> {
        let mut source = MemorySource::new();
        let data = Array::from_iter((1..=frames).map(|v| v as u16))
            .into_shape((frames, 1, 1, 1))
            .unwrap();
        let mut layout = SourceLayout::regular(frames, 2, 3);
        if let Some(train_frames) = train_frames {
            layout.train_frames = train_frames;
        }
        source.insert("DET/0CH0:xtdf", data.view(), &layout).unwrap();
        Arc::new(source)
    }

    #[test]
    fn module_mean_not_divisible() {
        let result = ModuleMean::new(source(7, None), "DET/0CH0:xtdf", 2, 1);
        match result.unwrap_err() {
            PulseAvgError::TrainsNotDivisible {
                name,
                frames,
                pulses_per_train,
            } => {
                assert_eq!("DET/0CH0:xtdf", name);
                assert_eq!(7, frames);
                assert_eq!(2, pulses_per_train);
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn module_mean_zero_parameters() {
        assert!(matches!(
            ModuleMean::new(source(8, None), "DET/0CH0:xtdf", 0, 1),
            Err(PulseAvgError::ZeroParameter {
                name: "pulses_per_train"
            })
        ));
        assert!(matches!(
            ModuleMean::new(source(8, None), "DET/0CH0:xtdf", 2, 0),
            Err(PulseAvgError::ZeroParameter {
                name: "trains_per_task"
            })
        ));
    }

    #[test]
    fn module_mean_shape_and_tasks() {
        let mean = ModuleMean::new(source(10, None), "DET/0CH0:xtdf", 2, 2).unwrap();
        assert_eq!([2, 1, 1], mean.shape());
        assert_eq!(5, mean.trains());
        assert_eq!(vec![0..4, 4..8, 8..10], mean.tasks());
        // 4 u16 frames of one pixel, a chunk of 3 frames and a sum of 2 pulses.
        assert_eq!(8 + 6 + 8, mean.task_memory(&(0..4)));
    }

    #[test]
    fn task_memory_counts_decoded_chunks() {
        let mut memory = MemorySource::new();
        let mut layout = SourceLayout::regular(16, 2, 16);
        layout.compression = Some(crate::models::Compression::Gzip);
        layout.filters = Some(vec![crate::models::Filter::Shuffle { element_size: 2 }]);
        let data = Array4::<u16>::zeros((16, 1, 1, 1));
        memory.insert("DET/0CH0:xtdf", data.view(), &layout).unwrap();
        let mean = ModuleMean::new(Arc::new(memory), "DET/0CH0:xtdf", 2, 1).unwrap();
        // 2 frames, the 16 frame chunk in 3 stages, and a sum of 2 pulses.
        assert_eq!(4 + 32 * 3 + 8, mean.task_memory(&(0..2)));
    }

    #[test]
    fn module_mean_run_task() {
        let mean = ModuleMean::new(source(8, None), "DET/0CH0:xtdf", 2, 2).unwrap();
        let partial = mean.run_task(4..8).unwrap();
        // Trains [5, 6], [7, 8].
        assert_eq!(array![[[12.0_f32]], [[14.0]]], partial.sum);
        assert_eq!(2, partial.trains);
    }

    #[test]
    fn validate_regular_trains() {
        let mean = ModuleMean::new(source(8, None), "DET/0CH0:xtdf", 2, 1).unwrap();
        mean.validate_trains().unwrap();
    }

    #[test]
    fn validate_irregular_trains() {
        let mean =
            ModuleMean::new(source(8, Some(vec![2, 3, 1, 2])), "DET/0CH0:xtdf", 2, 1).unwrap();
        match mean.validate_trains().unwrap_err() {
            PulseAvgError::IrregularTrain {
                train_id,
                frames,
                expected,
            } => {
                assert_eq!(10001, train_id);
                assert_eq!(3, frames);
                assert_eq!(2, expected);
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn validate_without_train_index() {
        let mean = ModuleMean::new(source(8, Some(vec![])), "DET/0CH0:xtdf", 2, 1).unwrap();
        mean.validate_trains().unwrap();
    }

    #[test]
    fn stack_empty() {
        assert!(matches!(
            LazyArray::stack(vec![]),
            Err(PulseAvgError::EmptyStack)
        ));
    }

    #[test]
    fn stack_shape_mismatch() {
        let first = LazyArray::from(Array::<f32, _>::zeros(vec![2, 1, 1]));
        let second = LazyArray::from(Array::<f32, _>::zeros(vec![3, 1, 1]));
        match LazyArray::stack(vec![first, second]).unwrap_err() {
            PulseAvgError::StackShapeMismatch {
                index,
                expected,
                actual,
            } => {
                assert_eq!(1, index);
                assert_eq!(vec![2, 1, 1], expected);
                assert_eq!(vec![3, 1, 1], actual);
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn stack_shape_and_module_means() {
        let mean = ModuleMean::new(source(8, None), "DET/0CH0:xtdf", 2, 1).unwrap();
        let concrete = LazyArray::from(Array::<f32, _>::zeros(vec![2, 1, 1]));
        let stacked = LazyArray::stack(vec![
            LazyArray::ModuleMean(mean.clone()),
            concrete,
            LazyArray::ModuleMean(mean),
        ])
        .unwrap();
        assert_eq!(vec![3, 2, 1, 1], stacked.shape());
        assert_eq!(2, stacked.module_means().len());
    }

    #[test]
    fn assemble_preserves_order() {
        let mean = ModuleMean::new(source(8, None), "DET/0CH0:xtdf", 2, 1).unwrap();
        let concrete = Array4::<f32>::from_elem((1, 2, 1, 1), 9.0)
            .into_shape(vec![2, 1, 1])
            .unwrap();
        let stacked = LazyArray::stack(vec![
            LazyArray::ModuleMean(mean.clone()),
            LazyArray::from(concrete),
            LazyArray::ModuleMean(mean),
        ])
        .unwrap();
        let mut means = vec![array![[[1.0_f32]], [[2.0]]], array![[[3.0_f32]], [[4.0]]]]
            .into_iter();
        let result = stacked.assemble(&mut means).unwrap();
        let expected = array![
            [[[1.0_f32]], [[2.0]]],
            [[[9.0]], [[9.0]]],
            [[[3.0]], [[4.0]]]
        ]
        .into_dyn();
        assert_eq!(expected, result);
    }
}
