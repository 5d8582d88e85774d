//! Error handling.

use ndarray::ShapeError;
use std::error::Error;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::AcquireError;
use tracing::{event, Level};
use zune_inflate::errors::InflateDecodeErrors;

/// Per-pulse averaging error type
///
/// This type encapsulates the various errors that may occur while locating, decoding and reducing
/// detector data. Any of them aborts the computation.
#[derive(Debug, Error)]
pub enum PulseAvgError {
    /// Decoded chunk does not hold the expected number of bytes
    #[error("chunk {file} decoded to {actual} bytes, expected {expected}")]
    ChunkSize {
        file: String,
        expected: usize,
        actual: usize,
    },

    /// Attempt to use a cluster after it has been closed
    #[error("cluster has been closed")]
    ClusterClosed,

    /// Error decompressing data
    #[error("failed to decompress data")]
    DecompressionFlate2(#[source] std::io::Error),

    /// Error decompressing data
    #[error("failed to decompress data")]
    DecompressionZune(#[from] InflateDecodeErrors),

    /// Error compressing data
    #[error("failed to compress data")]
    Compression(#[source] std::io::Error),

    /// Data length is not a multiple of the shuffle element size
    #[error("cannot shuffle {size} bytes with element size {element_size}")]
    ShuffleSize { size: usize, element_size: usize },

    /// Attempt to stack an empty sequence of arrays
    #[error("cannot stack an empty sequence of arrays")]
    EmptyStack,

    /// Frame range outside of the dataset
    #[error("frames {start}..{end} out of range for {name} with {frames} frames")]
    FrameRange {
        name: String,
        start: usize,
        end: usize,
        frames: usize,
    },

    /// Error converting from bytes to a type
    #[error("failed to convert from bytes to {type_name}")]
    FromBytes { type_name: &'static str },

    /// Insufficient memory to run a task
    #[error("insufficient memory to run task ({requested} > {total} bytes)")]
    InsufficientMemory { requested: usize, total: usize },

    /// Total memory of the requested jobs does not fit in memory size type
    #[error("{jobs} jobs of {memory} bytes exceed the addressable memory")]
    MemoryOverflow { jobs: usize, memory: usize },

    /// Invalid memory size string
    #[error("invalid memory size")]
    InvalidMemorySize(#[from] byte_unit::ParseError),

    /// Source name does not name a detector source
    #[error("invalid source name {name:?}: {reason}")]
    InvalidSourceName { name: String, reason: &'static str },

    /// A train does not contain the expected number of pulses
    #[error("train {train_id} has {frames} frames, expected {expected} pulses per train")]
    IrregularTrain {
        train_id: u64,
        frames: usize,
        expected: usize,
    },

    /// I/O error on a path
    #[error("failed to access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error (de)serialising JSON
    #[error("invalid JSON")]
    Json(#[from] serde_json::Error),

    /// Error registering or encoding metrics
    #[error("metrics error")]
    Metrics(#[from] prometheus::Error),

    /// Run directory does not exist
    #[error("run not found at {}", path.display())]
    RunNotFound { path: PathBuf },

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// Error creating or reshaping an ndarray
    #[error("invalid array shape")]
    ShapeInvalid(#[from] ShapeError),

    /// Detector source is not present in the run
    #[error("source {name} not found in run")]
    SourceNotFound { name: String },

    /// Arrays to be stacked do not share a shape
    #[error("cannot stack array {index} of shape {actual:?} with arrays of shape {expected:?}")]
    StackShapeMismatch {
        index: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A worker task panicked or was cancelled
    #[error("worker task failed")]
    TaskFailed(#[from] tokio::task::JoinError),

    /// Error building the worker thread pool
    #[error("failed to start workers")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Frame count is not divisible by the pulses per train
    #[error(
        "{name} has {frames} frames which cannot be split into trains of {pulses_per_train} pulses"
    )]
    TrainsNotDivisible {
        name: String,
        frames: usize,
        pulses_per_train: usize,
    },

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// Error validating configuration or metadata (single error)
    #[error("validation failed")]
    ValidationSingle(#[from] validator::ValidationError),

    /// Error validating configuration or metadata (multiple errors)
    #[error("validation failed")]
    Validation(#[from] validator::ValidationErrors),

    /// A parameter that must be positive was zero
    #[error("{name} must be greater than 0")]
    ZeroParameter { name: &'static str },
}

impl PulseAvgError {
    /// Return an [PulseAvgError::Io] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Log an error and its chain of causes.
pub fn log_error_chain(error: &PulseAvgError) {
    let mut messages = error_chain(error).into_iter();
    if let Some(message) = messages.next() {
        event!(Level::ERROR, "{}", message);
    }
    for cause in messages {
        event!(Level::ERROR, "Caused by: {}", cause);
    }
}

/// Collect an error and its chain of causes as strings, with adjacent duplicates removed.
pub fn error_chain(error: &PulseAvgError) -> Vec<String> {
    let mut messages = vec![error.to_string()];
    let mut current = error.source();
    while let Some(source) = current {
        messages.push(source.to_string());
        current = source.source();
    }
    messages.dedup();
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trains_not_divisible_message() {
        let error = PulseAvgError::TrainsNotDivisible {
            name: "DET/0CH0:xtdf".to_string(),
            frames: 10,
            pulses_per_train: 4,
        };
        assert_eq!(
            "DET/0CH0:xtdf has 10 frames which cannot be split into trains of 4 pulses",
            error.to_string()
        );
    }

    #[test]
    fn io_error_chain() {
        let error = PulseAvgError::io(
            "/no/such/chunk.bin",
            std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
        );
        assert_eq!(
            vec![
                "failed to access /no/such/chunk.bin".to_string(),
                "No such file or directory".to_string()
            ],
            error_chain(&error)
        );
    }

    #[test]
    fn validation_error_chain() {
        let error: PulseAvgError =
            validator::ValidationError::new("shape must have 4 dimensions").into();
        let chain = error_chain(&error);
        assert_eq!("validation failed", chain[0]);
        assert_eq!(2, chain.len());
    }

    #[test]
    fn stack_shape_mismatch_message() {
        let error = PulseAvgError::StackShapeMismatch {
            index: 3,
            expected: vec![64, 512, 128],
            actual: vec![32, 512, 128],
        };
        assert_eq!(
            "cannot stack array 3 of shape [32, 512, 128] with arrays of shape [64, 512, 128]",
            error.to_string()
        );
    }

    #[test]
    fn zero_parameter_message() {
        let error = PulseAvgError::ZeroParameter {
            name: "pulses_per_train",
        };
        assert_eq!("pulses_per_train must be greater than 0", error.to_string());
    }
}
