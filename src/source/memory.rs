//! In-memory detector sources.

use crate::array::{self, RawFrames};
use crate::error::PulseAvgError;
use crate::models::ModuleMetadata;
use crate::operation::Element;
use crate::source::{check_range, range_shape, DataSource, SourceLayout};

use hashbrown::HashMap;
use ndarray::ArrayView4;
use std::ops::Range;
use std::sync::Arc;

/// Detector sources held in memory.
///
/// Useful for small runs and for testing. Storage options of the layout other than the chunk and
/// train layout have no effect.
#[derive(Debug, Default)]
pub struct MemorySource {
    sources: HashMap<String, (Arc<ModuleMetadata>, RawFrames)>,
}

impl MemorySource {
    /// Returns an empty MemorySource.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source, replacing any source of the same name.
    ///
    /// # Arguments
    ///
    /// * `name`: Detector source name
    /// * `frames`: Frames of shape (frames, extra, rows, columns)
    /// * `layout`: Chunk and train layout of the source
    pub fn insert<T: Element>(
        &mut self,
        name: &str,
        frames: ArrayView4<T>,
        layout: &SourceLayout,
    ) -> Result<(), PulseAvgError> {
        let raw = RawFrames::from_array(frames);
        let metadata = layout.describe(name, raw.dtype, raw.shape)?;
        self.sources
            .insert(name.to_string(), (Arc::new(metadata), raw));
        Ok(())
    }

    fn get(&self, name: &str) -> Result<&(Arc<ModuleMetadata>, RawFrames), PulseAvgError> {
        self.sources
            .get(name)
            .ok_or_else(|| PulseAvgError::SourceNotFound {
                name: name.to_string(),
            })
    }
}

impl DataSource for MemorySource {
    fn metadata(&self, name: &str) -> Result<Arc<ModuleMetadata>, PulseAvgError> {
        Ok(self.get(name)?.0.clone())
    }

    fn read_frames(&self, name: &str, frames: Range<usize>) -> Result<RawFrames, PulseAvgError> {
        let (metadata, raw) = self.get(name)?;
        check_range(metadata, name, &frames)?;
        let frame_bytes = metadata.frame_bytes();
        let bytes = &raw.data[frames.start * frame_bytes..frames.end * frame_bytes];
        let mut data = array::aligned_buffer(bytes.len());
        data.extend_from_slice(bytes);
        RawFrames::new(metadata.dtype, range_shape(metadata, &frames), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::{s, Array4};

    #[test]
    fn read_frames_range() {
        let data = Array4::from_shape_fn((6, 1, 1, 2), |(f, _, _, c)| (f * 2 + c) as i64);
        let mut source = MemorySource::new();
        source
            .insert("DET/0CH0:xtdf", data.view(), &SourceLayout::regular(6, 3, 6))
            .unwrap();
        let raw = source.read_frames("DET/0CH0:xtdf", 3..6).unwrap();
        assert_eq!(
            data.slice(s![3..6, .., .., ..]),
            array::build_frames::<i64>(&raw).unwrap()
        );
        let metadata = source.metadata("DET/0CH0:xtdf").unwrap();
        assert_eq!(2, metadata.trains.len());
    }

    #[test]
    fn missing_source() {
        let source = MemorySource::new();
        assert!(matches!(
            source.metadata("DET/0CH0:xtdf"),
            Err(PulseAvgError::SourceNotFound { .. })
        ));
    }

    #[test]
    fn out_of_range() {
        let mut source = MemorySource::new();
        source
            .insert(
                "DET/0CH0:xtdf",
                Array4::<u16>::zeros((2, 1, 1, 1)).view(),
                &SourceLayout::regular(2, 2, 2),
            )
            .unwrap();
        assert!(matches!(
            source.read_frames("DET/0CH0:xtdf", 1..3),
            Err(PulseAvgError::FrameRange { .. })
        ));
    }
}
