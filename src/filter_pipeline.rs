//! Compression and filter pipeline for chunk files.

use crate::compression;
use crate::error::PulseAvgError;
use crate::filters;
use crate::models;
use crate::types::byte_order;

/// Returns chunk data in native byte order after undoing the storage pipeline.
///
/// The pipeline is applied in the reverse order to when the data was written: decompression,
/// then filters from last to first, then byte order conversion.
///
/// # Arguments
///
/// * `metadata`: Metadata of the source the chunk belongs to
/// * `data`: Chunk data as stored
pub fn decode_chunk(
    metadata: &models::ModuleMetadata,
    data: Vec<u8>,
) -> Result<Vec<u8>, PulseAvgError> {
    let mut data = match metadata.compression {
        Some(compression) => compression::decompress(compression, &data)?,
        None => data,
    };
    if let Some(filters) = &metadata.filters {
        for filter in filters.iter().rev() {
            data = filters::decode(filter, &data)?;
        }
    }
    byte_order::to_native(&mut data, metadata.byte_order, metadata.dtype.size_of());
    Ok(data)
}

/// Returns chunk data ready to be stored.
///
/// This is the inverse of [decode_chunk].
///
/// # Arguments
///
/// * `metadata`: Metadata of the source the chunk belongs to
/// * `data`: Chunk data in native byte order
pub fn encode_chunk(
    metadata: &models::ModuleMetadata,
    mut data: Vec<u8>,
) -> Result<Vec<u8>, PulseAvgError> {
    byte_order::to_native(&mut data, metadata.byte_order, metadata.dtype.size_of());
    if let Some(filters) = &metadata.filters {
        for filter in filters {
            data = filters::encode(filter, &data)?;
        }
    }
    match metadata.compression {
        Some(compression) => compression::compress(compression, &data),
        None => Ok(data),
    }
}
