//! Byte shuffle filter
//!
//! For an array of N elements of M bytes each, the shuffle filter writes byte 0 of every element
//! first, then byte 1 of every element, and so on. Detector chunks are often stored shuffled
//! because pixel values of neighbouring frames share their high bytes, which then compress well.

use crate::error::PulseAvgError;

fn check_size(data: &[u8], element_size: usize) -> Result<usize, PulseAvgError> {
    if element_size == 0 || data.len() % element_size != 0 {
        return Err(PulseAvgError::ShuffleSize {
            size: data.len(),
            element_size,
        });
    }
    Ok(data.len() / element_size)
}

/// Decode the byte shuffle filter.
///
/// # Arguments
///
/// * `data`: Bytes to deshuffle.
/// * `element_size`: Size of each element in bytes.
pub fn deshuffle(data: &[u8], element_size: usize) -> Result<Vec<u8>, PulseAvgError> {
    let num_elements = check_size(data, element_size)?;
    let mut result = vec![0; data.len()];
    // Each plane of the input holds one byte position of every element.
    for (byte, plane) in data.chunks_exact(num_elements.max(1)).enumerate() {
        for (element, value) in plane.iter().enumerate() {
            result[element * element_size + byte] = *value;
        }
    }
    Ok(result)
}

/// Apply the byte shuffle filter.
///
/// # Arguments
///
/// * `data`: Bytes to shuffle.
/// * `element_size`: Size of each element in bytes.
pub fn shuffle(data: &[u8], element_size: usize) -> Result<Vec<u8>, PulseAvgError> {
    let num_elements = check_size(data, element_size)?;
    let mut result = vec![0; data.len()];
    for (element, bytes) in data.chunks_exact(element_size).enumerate() {
        for (byte, value) in bytes.iter().enumerate() {
            result[byte * num_elements + element] = *value;
        }
    }
    Ok(result)
}
