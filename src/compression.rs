//! (De)compression support.

use crate::error::PulseAvgError;
use crate::models;

use flate2::read::{GzDecoder, GzEncoder, ZlibEncoder};
use std::io::Read;
use zune_inflate::{DeflateDecoder, DeflateOptions};

/// Decompresses a chunk and returns the uncompressed data.
///
/// # Arguments
///
/// * `compression`: Compression algorithm
/// * `data`: Compressed data
pub fn decompress(
    compression: models::Compression,
    data: &[u8],
) -> Result<Vec<u8>, PulseAvgError> {
    match compression {
        models::Compression::Gzip => decompress_flate2_gzip(data),
        models::Compression::Zlib => decompress_zune_zlib(data),
    }
}

/// Compresses a chunk and returns the compressed data.
///
/// # Arguments
///
/// * `compression`: Compression algorithm
/// * `data`: Uncompressed data
pub fn compress(compression: models::Compression, data: &[u8]) -> Result<Vec<u8>, PulseAvgError> {
    let mut result = Vec::<u8>::new();
    let written = match compression {
        models::Compression::Gzip => {
            GzEncoder::new(data, flate2::Compression::fast()).read_to_end(&mut result)
        }
        models::Compression::Zlib => {
            ZlibEncoder::new(data, flate2::Compression::fast()).read_to_end(&mut result)
        }
    };
    written.map_err(PulseAvgError::Compression)?;
    Ok(result)
}

fn decompress_flate2_gzip(data: &[u8]) -> Result<Vec<u8>, PulseAvgError> {
    let mut decoder = GzDecoder::<&[u8]>::new(data);
    let mut buf = Vec::with_capacity(data.len());
    decoder
        .read_to_end(&mut buf)
        .map_err(PulseAvgError::DecompressionFlate2)?;
    Ok(buf)
}

fn decompress_zune_zlib(data: &[u8]) -> Result<Vec<u8>, PulseAvgError> {
    let options = DeflateOptions::default().set_size_hint(data.len());
    let mut decoder = DeflateDecoder::new_with_options(data, options);
    Ok(decoder.decode_zlib()?)
}
