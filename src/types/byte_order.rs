//! Byte order of stored detector data

use serde::{Deserialize, Serialize};

#[cfg(target_endian = "big")]
pub const NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Big;

#[cfg(target_endian = "little")]
pub const NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Little;

#[cfg(target_endian = "big")]
pub const NON_NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Little;

#[cfg(target_endian = "little")]
pub const NON_NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Big;

/// Byte order / endianness.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Big Endian
    Big,
    /// Little Endian
    #[default]
    Little,
}

impl ByteOrder {
    /// Returns whether this is the byte order of the host.
    pub fn is_native(self) -> bool {
        self == NATIVE_BYTE_ORDER
    }
}

/// Convert elements between `byte_order` and the host byte order in place.
///
/// The conversion is its own inverse, so this serves both reading and writing.
///
/// # Arguments
///
/// * `data`: Raw element bytes. Length must be a multiple of `element_size`.
/// * `byte_order`: Byte order of the stored data
/// * `element_size`: Size of each element in bytes.
pub fn to_native(data: &mut [u8], byte_order: ByteOrder, element_size: usize) {
    if byte_order.is_native() || element_size < 2 {
        return;
    }
    data.chunks_exact_mut(element_size)
        .for_each(|element| element.reverse());
}
