//! Runs stored as a directory of chunk files.
//!
//! Layout of a run:
//!
//! ```text
//! <run>/
//!   SPB_DET_AGIPD1M-1_DET_0CH0_xtdf/
//!     metadata.json
//!     chunk-00000.bin
//!     chunk-00001.bin
//!     ...
//! ```

use crate::array::{self, RawFrames};
use crate::error::PulseAvgError;
use crate::filter_pipeline;
use crate::metrics;
use crate::models::{ChunkInfo, ModuleMetadata};
use crate::operation::Element;
use crate::source::{check_range, directory_name, range_shape, DataSource, SourceLayout};

use hashbrown::HashMap;
use ndarray::{Array4, ArrayView4, ErrorKind, ShapeError};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};
use validator::Validate;

const METADATA_FILE: &str = "metadata.json";

/// Locates a run by proposal and run number below a data root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunLocator {
    /// Root directory of all proposals
    pub data_root: PathBuf,
    /// Proposal number
    pub proposal: u32,
    /// Run number
    pub run: u32,
}

impl RunLocator {
    /// Returns the path of the run's raw data.
    pub fn path(&self) -> PathBuf {
        self.data_root
            .join(format!("p{:06}", self.proposal))
            .join("raw")
            .join(format!("r{:04}", self.run))
    }
}

/// A run stored on the local file system.
#[derive(Debug)]
pub struct RunDirectory {
    /// Path of the run directory
    path: PathBuf,
    /// Metadata of sources read so far
    metadata: RwLock<HashMap<String, Arc<ModuleMetadata>>>,
}

impl RunDirectory {
    /// Open a run directory.
    ///
    /// # Arguments
    ///
    /// * `path`: Path of the run directory
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PulseAvgError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(PulseAvgError::RunNotFound { path });
        }
        info!("Opened run {}", path.display());
        Ok(Self {
            path,
            metadata: RwLock::new(HashMap::new()),
        })
    }

    /// Path of the run directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn source_dir(&self, name: &str) -> Result<PathBuf, PulseAvgError> {
        Ok(self.path.join(directory_name(name)?))
    }

    fn load_metadata(&self, name: &str) -> Result<ModuleMetadata, PulseAvgError> {
        let path = self.source_dir(name)?.join(METADATA_FILE);
        if !path.is_file() {
            return Err(PulseAvgError::SourceNotFound {
                name: name.to_string(),
            });
        }
        let contents = std::fs::read(&path).map_err(|err| PulseAvgError::io(&path, err))?;
        let metadata: ModuleMetadata = serde_json::from_slice(&contents)?;
        metadata.validate()?;
        if metadata.source != name {
            return Err(PulseAvgError::InvalidSourceName {
                name: metadata.source,
                reason: "metadata describes a different source",
            });
        }
        Ok(metadata)
    }
}

impl DataSource for RunDirectory {
    #[tracing::instrument(level = "DEBUG", skip(self))]
    fn metadata(&self, name: &str) -> Result<Arc<ModuleMetadata>, PulseAvgError> {
        if let Some(metadata) = self
            .metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(metadata.clone());
        }
        let metadata = Arc::new(self.load_metadata(name)?);
        self.metadata
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), metadata.clone());
        Ok(metadata)
    }

    #[tracing::instrument(level = "DEBUG", skip(self))]
    fn read_frames(&self, name: &str, frames: Range<usize>) -> Result<RawFrames, PulseAvgError> {
        let metadata = self.metadata(name)?;
        check_range(&metadata, name, &frames)?;
        let frame_bytes = metadata.frame_bytes();
        let dir = self.source_dir(name)?;
        let mut data = array::aligned_buffer(frames.len() * frame_bytes);
        for chunk in metadata.chunks_overlapping(frames.start, frames.end) {
            let path = dir.join(&chunk.file);
            let stored = std::fs::read(&path).map_err(|err| PulseAvgError::io(&path, err))?;
            debug!("Read {} bytes from {}", stored.len(), path.display());
            metrics::CHUNKS_READ.inc();
            metrics::CHUNK_BYTES_READ.inc_by(stored.len() as u64);
            let decoded = filter_pipeline::decode_chunk(&metadata, stored)?;
            let expected = chunk.frames * frame_bytes;
            if decoded.len() != expected {
                return Err(PulseAvgError::ChunkSize {
                    file: path.display().to_string(),
                    expected,
                    actual: decoded.len(),
                });
            }
            let start = frames.start.max(chunk.first_frame) - chunk.first_frame;
            let end = frames.end.min(chunk.end_frame()) - chunk.first_frame;
            data.extend_from_slice(&decoded[start * frame_bytes..end * frame_bytes]);
        }
        RawFrames::new(metadata.dtype, range_shape(&metadata, &frames), data)
    }
}

/// Writes sources into a run directory.
#[derive(Debug)]
pub struct RunWriter {
    path: PathBuf,
}

impl RunWriter {
    /// Create a run directory, if it does not exist.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, PulseAvgError> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path).map_err(|err| PulseAvgError::io(&path, err))?;
        Ok(Self { path })
    }

    /// Path of the run directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the frames of one source and return its metadata.
    ///
    /// # Arguments
    ///
    /// * `name`: Detector source name
    /// * `frames`: Frames of shape (frames, extra, rows, columns)
    /// * `layout`: Storage layout of the source
    #[tracing::instrument(level = "DEBUG", skip(self, frames, layout))]
    pub fn write_source<T: Element>(
        &self,
        name: &str,
        frames: ArrayView4<T>,
        layout: &SourceLayout,
    ) -> Result<ModuleMetadata, PulseAvgError> {
        let raw = RawFrames::from_array(frames);
        let metadata = layout.describe(name, raw.dtype, raw.shape)?;
        let frame_bytes = metadata.frame_bytes();
        self.write_chunks(name, metadata, |chunk| {
            let start = chunk.first_frame * frame_bytes;
            let end = chunk.end_frame() * frame_bytes;
            Ok(raw.data[start..end].to_vec())
        })
    }

    /// Write one source whose frames are generated a chunk at a time, and return its metadata.
    ///
    /// Only one chunk of frames is held in memory at once.
    ///
    /// # Arguments
    ///
    /// * `name`: Detector source name
    /// * `shape`: Shape of the source as (frames, extra, rows, columns)
    /// * `layout`: Storage layout of the source
    /// * `generate`: Returns the frames of a frame range
    #[tracing::instrument(level = "DEBUG", skip(self, layout, generate))]
    pub fn write_generated_source<T: Element>(
        &self,
        name: &str,
        shape: [usize; 4],
        layout: &SourceLayout,
        mut generate: impl FnMut(Range<usize>) -> Array4<T>,
    ) -> Result<ModuleMetadata, PulseAvgError> {
        let metadata = layout.describe(name, T::DTYPE, shape)?;
        self.write_chunks(name, metadata, |chunk| {
            let frames = chunk.first_frame..chunk.end_frame();
            let expected = [frames.len(), shape[1], shape[2], shape[3]];
            let block = generate(frames);
            if block.shape() != expected {
                return Err(PulseAvgError::ShapeInvalid(ShapeError::from_kind(
                    ErrorKind::IncompatibleShape,
                )));
            }
            Ok(RawFrames::from_array(block.view()).data)
        })
    }

    /// Encode and write each chunk of a source, then its metadata.
    fn write_chunks(
        &self,
        name: &str,
        metadata: ModuleMetadata,
        mut chunk_data: impl FnMut(&ChunkInfo) -> Result<Vec<u8>, PulseAvgError>,
    ) -> Result<ModuleMetadata, PulseAvgError> {
        let dir = self.path.join(directory_name(name)?);
        std::fs::create_dir_all(&dir).map_err(|err| PulseAvgError::io(&dir, err))?;
        for chunk in &metadata.chunks {
            let stored = filter_pipeline::encode_chunk(&metadata, chunk_data(chunk)?)?;
            let path = dir.join(&chunk.file);
            std::fs::write(&path, stored).map_err(|err| PulseAvgError::io(&path, err))?;
        }
        let path = dir.join(METADATA_FILE);
        std::fs::write(&path, serde_json::to_vec_pretty(&metadata)?)
            .map_err(|err| PulseAvgError::io(&path, err))?;
        debug!(
            "Wrote {} frames in {} chunks to {}",
            metadata.frames(),
            metadata.chunks.len(),
            dir.display()
        );
        Ok(metadata)
    }
}
