//! Detector data access.
//!
//! A [DataSource] exposes the frames of each detector source of a run. Frames are only read when
//! a frame range is requested, so a source can be far larger than memory.

pub mod memory;
pub mod run_directory;

pub use crate::source::memory::MemorySource;
pub use crate::source::run_directory::{RunDirectory, RunLocator, RunWriter};

use crate::array::RawFrames;
use crate::error::PulseAvgError;
use crate::models::{ChunkInfo, DType, Filter, ModuleMetadata, TrainInfo};
use crate::types::byte_order::{ByteOrder, NATIVE_BYTE_ORDER};

use std::ops::Range;
use std::sync::Arc;
use validator::Validate;

/// Source name pattern of the AGIPD 1M detector modules.
pub const DEFAULT_SOURCE_PATTERN: &str = "SPB_DET_AGIPD1M-1/DET/{module}CH0:xtdf";

/// Key of the pixel data within a detector source.
pub const DEFAULT_KEY: &str = "image.data";

/// Placeholder for the module index in a source name pattern.
const MODULE_PLACEHOLDER: &str = "{module}";

/// Detector data source trait.
///
/// Implementations must be shareable between worker threads.
pub trait DataSource: std::fmt::Debug + Send + Sync {
    /// Returns the validated metadata of a source.
    ///
    /// # Arguments
    ///
    /// * `name`: Detector source name
    fn metadata(&self, name: &str) -> Result<Arc<ModuleMetadata>, PulseAvgError>;

    /// Returns decoded frames of a source, in native byte order.
    ///
    /// # Arguments
    ///
    /// * `name`: Detector source name
    /// * `frames`: Range of global frame indices to read
    fn read_frames(&self, name: &str, frames: Range<usize>) -> Result<RawFrames, PulseAvgError>;
}

/// Returns the source name of a detector module.
///
/// # Arguments
///
/// * `pattern`: Source name pattern containing `{module}`
/// * `module`: Module index
pub fn source_name(pattern: &str, module: usize) -> Result<String, PulseAvgError> {
    if !pattern.contains(MODULE_PLACEHOLDER) {
        return Err(PulseAvgError::InvalidSourceName {
            name: pattern.to_string(),
            reason: "pattern must contain {module}",
        });
    }
    let name = pattern.replace(MODULE_PLACEHOLDER, &module.to_string());
    validate_source_name(&name)?;
    Ok(name)
}

/// Check that a source name is well formed.
pub fn validate_source_name(name: &str) -> Result<(), PulseAvgError> {
    let invalid = |reason| PulseAvgError::InvalidSourceName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.starts_with('/') || name.contains("..") {
        return Err(invalid("name must not be a path"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_/:.".contains(c))
    {
        return Err(invalid("name may only contain letters, digits and -_/:."));
    }
    Ok(())
}

/// Returns the directory name under which a source is stored in a run.
pub fn directory_name(name: &str) -> Result<String, PulseAvgError> {
    validate_source_name(name)?;
    Ok(name.replace(['/', ':'], "_"))
}

/// Returns frame counts of `frames` frames split into trains of `pulses_per_train`.
///
/// A trailing partial train is kept.
pub fn regular_trains(frames: usize, pulses_per_train: usize) -> Vec<usize> {
    if pulses_per_train == 0 {
        return vec![];
    }
    let mut trains = vec![pulses_per_train; frames / pulses_per_train];
    if frames % pulses_per_train != 0 {
        trains.push(frames % pulses_per_train);
    }
    trains
}

/// Options describing how a source is laid out in storage.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceLayout {
    /// Key of the dataset within the source
    pub key: String,
    /// Maximum number of frames per chunk file
    pub chunk_frames: usize,
    /// Per-train frame counts
    pub train_frames: Vec<usize>,
    /// Identifier of the first train
    pub first_train_id: u64,
    /// Byte order of stored data
    pub byte_order: ByteOrder,
    /// Compression applied to each chunk
    pub compression: Option<crate::models::Compression>,
    /// Filters applied to each chunk
    pub filters: Option<Vec<Filter>>,
}

impl SourceLayout {
    /// Returns a layout of regular trains with native, uncompressed chunks.
    ///
    /// # Arguments
    ///
    /// * `frames`: Number of frames in the source
    /// * `pulses_per_train`: Number of frames per train
    /// * `chunk_frames`: Maximum number of frames per chunk file
    pub fn regular(frames: usize, pulses_per_train: usize, chunk_frames: usize) -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
            chunk_frames,
            train_frames: regular_trains(frames, pulses_per_train),
            first_train_id: 10000,
            byte_order: NATIVE_BYTE_ORDER,
            compression: None,
            filters: None,
        }
    }

    /// Build and validate the metadata of a source with this layout.
    ///
    /// # Arguments
    ///
    /// * `name`: Detector source name
    /// * `dtype`: Data type
    /// * `shape`: Shape as (frames, extra, rows, columns)
    pub fn describe(
        &self,
        name: &str,
        dtype: DType,
        shape: [usize; 4],
    ) -> Result<ModuleMetadata, PulseAvgError> {
        validate_source_name(name)?;
        if self.chunk_frames == 0 {
            return Err(PulseAvgError::ZeroParameter {
                name: "chunk_frames",
            });
        }
        let frames = shape[0];
        let chunks = (0..frames)
            .step_by(self.chunk_frames)
            .enumerate()
            .map(|(index, first_frame)| ChunkInfo {
                file: format!("chunk-{:05}.bin", index),
                first_frame,
                frames: self.chunk_frames.min(frames - first_frame),
            })
            .collect();
        let trains = self
            .train_frames
            .iter()
            .enumerate()
            .map(|(index, frames)| TrainInfo {
                train_id: self.first_train_id + index as u64,
                frames: *frames,
            })
            .collect();
        let metadata = ModuleMetadata {
            source: name.to_string(),
            key: self.key.clone(),
            dtype,
            byte_order: self.byte_order,
            shape: shape.to_vec(),
            compression: self.compression,
            filters: self.filters.clone(),
            chunks,
            trains,
        };
        metadata.validate()?;
        Ok(metadata)
    }
}

/// Check that a frame range lies within a source.
fn check_range(
    metadata: &ModuleMetadata,
    name: &str,
    frames: &Range<usize>,
) -> Result<(), PulseAvgError> {
    if frames.start > frames.end || frames.end > metadata.frames() {
        return Err(PulseAvgError::FrameRange {
            name: name.to_string(),
            start: frames.start,
            end: frames.end,
            frames: metadata.frames(),
        });
    }
    Ok(())
}

/// Shape of a frame range of a source.
fn range_shape(metadata: &ModuleMetadata, frames: &Range<usize>) -> [usize; 4] {
    [
        frames.len(),
        metadata.shape[1],
        metadata.shape[2],
        metadata.shape[3],
    ]
}
