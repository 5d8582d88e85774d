//! Data types and associated functions and methods

use crate::types::ByteOrder;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use validator::{Validate, ValidationError};

/// Supported numerical data types
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// [i16]
    Int16,
    /// [i32]
    Int32,
    /// [i64]
    Int64,
    /// [u16]
    Uint16,
    /// [u32]
    Uint32,
    /// [u64]
    Uint64,
    /// [f32]
    Float32,
    /// [f64]
    Float64,
}

impl DType {
    /// Returns the size of the associated type in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Self::Int16 => std::mem::size_of::<i16>(),
            Self::Int32 => std::mem::size_of::<i32>(),
            Self::Int64 => std::mem::size_of::<i64>(),
            Self::Uint16 => std::mem::size_of::<u16>(),
            Self::Uint32 => std::mem::size_of::<u32>(),
            Self::Uint64 => std::mem::size_of::<u64>(),
            Self::Float32 => std::mem::size_of::<f32>(),
            Self::Float64 => std::mem::size_of::<f64>(),
        }
    }
}

/// Compression algorithm
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "id")]
pub enum Compression {
    /// Gzip
    Gzip,
    /// Zlib
    Zlib,
}

/// Filter algorithm
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "id")]
pub enum Filter {
    /// Byte shuffle
    Shuffle { element_size: usize },
}

/// A file holding a contiguous range of frames
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ChunkInfo {
    /// File name relative to the source directory
    #[validate(
        length(min = 1, message = "chunk file must not be empty"),
        custom = "validate_file_name"
    )]
    pub file: String,
    /// Index of the first frame in the chunk
    pub first_frame: usize,
    /// Number of frames in the chunk
    #[validate(range(min = 1, message = "chunk frames must be greater than 0"))]
    pub frames: usize,
}

impl ChunkInfo {
    /// One past the last frame in the chunk.
    pub fn end_frame(&self) -> usize {
        self.first_frame + self.frames
    }
}

/// Frame count of a single train
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TrainInfo {
    /// Train identifier
    pub train_id: u64,
    /// Number of frames recorded for the train
    pub frames: usize,
}

/// Description of the frames of one detector source
///
/// This is stored as `metadata.json` next to the chunk files of a source.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_module_metadata"))]
pub struct ModuleMetadata {
    /// Detector source name
    #[validate(length(min = 1, message = "source must not be empty"))]
    pub source: String,
    /// Key of the dataset within the source
    #[validate(length(min = 1, message = "key must not be empty"))]
    pub key: String,
    /// Data type
    pub dtype: DType,
    /// Byte order of the stored data
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Shape as (frames, extra, rows, columns)
    #[validate(
        length(equal = 4, message = "shape must have 4 dimensions"),
        custom = "validate_shape"
    )]
    pub shape: Vec<usize>,
    /// Compression applied to each chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
    /// Filters applied to each chunk, in the order they were applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,
    /// Chunk files in frame order
    #[validate]
    #[validate(length(min = 1, message = "chunks must not be empty"))]
    pub chunks: Vec<ChunkInfo>,
    /// Per-train frame counts
    #[serde(default)]
    pub trains: Vec<TrainInfo>,
}

impl ModuleMetadata {
    /// Number of frames.
    pub fn frames(&self) -> usize {
        self.shape[0]
    }

    /// (rows, columns) of a single frame.
    pub fn pixel_shape(&self) -> (usize, usize) {
        (self.shape[2], self.shape[3])
    }

    /// Number of elements in one frame, including the extra axis.
    pub fn frame_len(&self) -> usize {
        self.shape[1..].iter().product()
    }

    /// Number of bytes in one frame.
    pub fn frame_bytes(&self) -> usize {
        self.frame_len() * self.dtype.size_of()
    }

    /// Chunks overlapping the frame range `start..end`.
    pub fn chunks_overlapping(
        &self,
        start: usize,
        end: usize,
    ) -> impl Iterator<Item = &ChunkInfo> {
        self.chunks
            .iter()
            .filter(move |chunk| chunk.first_frame < end && chunk.end_frame() > start)
    }
}

/// Validate an array shape
fn validate_shape(shape: &[usize]) -> Result<(), ValidationError> {
    if shape.iter().any(|index| *index == 0) {
        return Err(ValidationError::new("shape indices must be greater than 0"));
    }
    Ok(())
}

/// Validate that a chunk file name stays inside its source directory
fn validate_file_name(file: &str) -> Result<(), ValidationError> {
    if file == ".." || file.contains(['/', '\\']) {
        let mut error = ValidationError::new("Chunk file must be a plain file name");
        error.add_param("file".into(), &file);
        return Err(error);
    }
    Ok(())
}

/// Validate that chunks are contiguous and cover every frame
fn validate_chunks(frames: usize, chunks: &[ChunkInfo]) -> Result<(), ValidationError> {
    let mut expected_first = 0;
    for chunk in chunks {
        if chunk.first_frame != expected_first {
            let mut error = ValidationError::new("Chunks must be contiguous and in frame order");
            error.add_param("file".into(), &chunk.file);
            error.add_param("first frame".into(), &chunk.first_frame);
            error.add_param("expected first frame".into(), &expected_first);
            return Err(error);
        }
        expected_first = chunk.end_frame();
    }
    if expected_first != frames {
        let mut error = ValidationError::new("Chunks must cover all frames");
        error.add_param("frames".into(), &frames);
        error.add_param("chunk frames".into(), &expected_first);
        return Err(error);
    }
    Ok(())
}

/// Validate that per-train frame counts add up to the frame count
fn validate_trains(frames: usize, trains: &[TrainInfo]) -> Result<(), ValidationError> {
    if trains.is_empty() {
        return Ok(());
    }
    let train_frames = trains.iter().map(|train| train.frames).sum::<usize>();
    if train_frames != frames {
        let mut error = ValidationError::new("Train frame counts must add up to the frame count");
        error.add_param("frames".into(), &frames);
        error.add_param("train frames".into(), &train_frames);
        return Err(error);
    }
    Ok(())
}

/// Validate raw data size against data type and shape.
///
/// # Arguments
///
/// * `raw_size`: Raw (decoded) size of the data in bytes.
/// * `dtype`: Data type
/// * `shape`: Shape of the multi-dimensional array
pub fn validate_raw_size(
    raw_size: usize,
    dtype: DType,
    shape: &[usize],
) -> Result<(), ValidationError> {
    let dtype_size = dtype.size_of();
    let expected_size = shape.iter().product::<usize>() * dtype_size;
    if raw_size != expected_size {
        let mut error = ValidationError::new(
            "Raw data size must be equal to the product of shape indices and dtype size in bytes",
        );
        error.add_param("raw size".into(), &raw_size);
        error.add_param("dtype size".into(), &dtype_size);
        error.add_param("expected size".into(), &expected_size);
        return Err(error);
    }
    Ok(())
}

/// Validate module metadata
fn validate_module_metadata(metadata: &ModuleMetadata) -> Result<(), ValidationError> {
    // Field validation reports malformed shapes.
    if metadata.shape.len() != 4 {
        return Ok(());
    }
    validate_chunks(metadata.frames(), &metadata.chunks)?;
    validate_trains(metadata.frames(), &metadata.trains)?;
    if let Some(filters) = &metadata.filters {
        for filter in filters {
            match filter {
                Filter::Shuffle { element_size } if *element_size == 0 => {
                    return Err(ValidationError::new(
                        "Shuffle element size must be greater than 0",
                    ));
                }
                Filter::Shuffle { .. } => (),
            }
        }
    }
    Ok(())
}
