//! Filter implementations.

pub mod shuffle;

use crate::error::PulseAvgError;
use crate::models;

/// Decodes some bytes using the specified filter and returns the result.
///
/// # Arguments
///
/// * `filter`: Filter algorithm
/// * `data`: Filtered data
pub fn decode(filter: &models::Filter, data: &[u8]) -> Result<Vec<u8>, PulseAvgError> {
    match filter {
        models::Filter::Shuffle { element_size } => shuffle::deshuffle(data, *element_size),
    }
}

/// Encodes some bytes using the specified filter and returns the result.
///
/// # Arguments
///
/// * `filter`: Filter algorithm
/// * `data`: Unfiltered data
pub fn encode(filter: &models::Filter, data: &[u8]) -> Result<Vec<u8>, PulseAvgError> {
    match filter {
        models::Filter::Shuffle { element_size } => shuffle::shuffle(data, *element_size),
    }
}
