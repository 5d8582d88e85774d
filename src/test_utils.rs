use crate::models::*;
use crate::types::ByteOrder;

use tempfile::TempDir;

/// Create a ModuleMetadata object for 4 trains of 2 single pixel uint16 frames in 2 chunks.
pub(crate) fn get_test_metadata() -> ModuleMetadata {
    ModuleMetadata {
        source: "SPB_DET_AGIPD1M-1/DET/0CH0:xtdf".to_string(),
        key: "image.data".to_string(),
        dtype: DType::Uint16,
        byte_order: ByteOrder::default(),
        shape: vec![8, 1, 1, 1],
        compression: None,
        filters: None,
        chunks: vec![
            ChunkInfo {
                file: "chunk-00000.bin".to_string(),
                first_frame: 0,
                frames: 5,
            },
            ChunkInfo {
                file: "chunk-00001.bin".to_string(),
                first_frame: 5,
                frames: 3,
            },
        ],
        trains: (0..4)
            .map(|index| TrainInfo {
                train_id: 10000 + index,
                frames: 2,
            })
            .collect(),
    }
}

/// Create a temporary directory, removed when dropped.
pub(crate) fn temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("pulseavg-")
        .tempdir()
        .unwrap()
}
